use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, trace};

use crate::container::ContainerReader;
use crate::error::ArchiveError;
use crate::id::ObjectId;
use crate::manifest;
use crate::persistable::Persistable;
use crate::record::Record;
use crate::registry::{self, FactoryRegistry};

/// Read side of one persistence session.
///
/// Reading the container only parses records; objects are reconstructed on
/// demand by [`get`](InputArchive::get) and cached, so every reference to an
/// id resolves to the same shared instance. Sharing is only guaranteed within
/// one `InputArchive`.
///
/// An archive is driven by a single reader: its cache is not thread-safe.
pub struct InputArchive<'r> {
    registry: &'r FactoryRegistry,
    records: IndexMap<ObjectId, Record>,
    cache: RefCell<HashMap<ObjectId, Arc<dyn Persistable>>>,
    /// Ids whose factories are currently running.
    pending: RefCell<HashSet<ObjectId>>,
}

impl InputArchive<'static> {
    /// Parses the archive at the reader's current HDU, resolving types through
    /// the process-wide registry.
    pub fn read_container(reader: &mut ContainerReader) -> Result<Self, ArchiveError> {
        Self::read_container_with(reader, registry::global())
    }
}

impl<'r> InputArchive<'r> {
    /// Parses the archive at the reader's current HDU, resolving types through
    /// `registry`.
    pub fn read_container_with(
        reader: &mut ContainerReader,
        registry: &'r FactoryRegistry,
    ) -> Result<Self, ArchiveError> {
        let start = reader.current_hdu();
        let records = manifest::read(reader)?;
        debug!("read archive with {} object(s) from HDU {}", records.len(), start);
        Ok(Self::from_records(records, registry))
    }

    pub(crate) fn from_records(records: IndexMap<ObjectId, Record>, registry: &'r FactoryRegistry) -> Self {
        InputArchive {
            registry,
            records,
            cache: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashSet::new()),
        }
    }

    /// An archive with no records.
    pub fn empty(registry: &'r FactoryRegistry) -> Self {
        Self::from_records(IndexMap::new(), registry)
    }

    pub fn registry(&self) -> &'r FactoryRegistry {
        self.registry
    }

    /// Returns the object with the given id, reconstructing it on first use.
    ///
    /// [`ObjectId::NULL`] yields `None`. Factories may call `get` for the ids
    /// their record references; those children are fully built (and cached)
    /// before the parent is.
    pub fn get(&self, id: ObjectId) -> Result<Option<Arc<dyn Persistable>>, ArchiveError> {
        if id.is_null() {
            return Ok(None);
        }
        if let Some(object) = self.cache.borrow().get(&id) {
            return Ok(Some(Arc::clone(object)));
        }

        let record = self.records.get(&id).ok_or(ArchiveError::MissingObject(id))?;
        let factory = self.registry.lookup(record.name())?;

        if !self.pending.borrow_mut().insert(id) {
            return Err(ArchiveError::CyclicRead(id));
        }
        trace!("reconstructing object {} ('{}')", id, record.name());
        let result = factory.read(self, record);
        self.pending.borrow_mut().remove(&id);

        let object = result?;
        self.cache.borrow_mut().insert(id, Arc::clone(&object));
        Ok(Some(object))
    }

    /// Like [`get`](InputArchive::get), downcasting to a concrete type.
    pub fn get_as<T: Persistable>(&self, id: ObjectId) -> Result<Option<Arc<T>>, ArchiveError> {
        match self.get(id)? {
            Some(object) => object
                .into_any()
                .downcast::<T>()
                .map(Some)
                .map_err(|_| ArchiveError::TypeMismatch {
                    id,
                    expected: std::any::type_name::<T>(),
                }),
            None => Ok(None),
        }
    }

    /// The first object written to the archive (id 1).
    pub fn primary(&self) -> Result<Arc<dyn Persistable>, ArchiveError> {
        self.get(ObjectId::PRIMARY)?
            .ok_or(ArchiveError::MissingObject(ObjectId::PRIMARY))
    }

    pub fn primary_as<T: Persistable>(&self) -> Result<Arc<T>, ArchiveError> {
        self.get_as::<T>(ObjectId::PRIMARY)?
            .ok_or(ArchiveError::MissingObject(ObjectId::PRIMARY))
    }

    pub fn record(&self, id: ObjectId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Ids in manifest order.
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `id` has already been reconstructed.
    pub fn is_cached(&self, id: ObjectId) -> bool {
        self.cache.borrow().contains_key(&id)
    }
}

impl std::fmt::Debug for InputArchive<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputArchive")
            .field("records", &self.records.len())
            .field("cached", &self.cache.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;

    #[derive(Debug)]
    struct Node {
        child: Option<Arc<Node>>,
    }

    impl Persistable for Node {
        fn persistence_name(&self) -> &str {
            "Node"
        }
    }

    fn read_node(archive: &InputArchive<'_>, record: &Record) -> Result<Arc<dyn Persistable>, ArchiveError> {
        let child = archive.get_as::<Node>(record.get("child")?)?;
        Ok(Arc::new(Node { child }))
    }

    fn node_record(id: u64, child: u64) -> (ObjectId, Record) {
        let mut payload = Payload::new();
        payload.insert("child", ciborium::Value::serialized(&child).unwrap());
        let id = ObjectId::new(id);
        (id, Record::new(id, "Node", payload))
    }

    fn registry() -> FactoryRegistry {
        let mut registry = FactoryRegistry::new();
        registry.register("Node", read_node).unwrap();
        registry
    }

    #[test]
    fn null_is_none() {
        let registry = registry();
        let archive = InputArchive::empty(&registry);
        assert!(archive.get(ObjectId::NULL).unwrap().is_none());
    }

    #[test]
    fn get_is_idempotent() {
        let registry = registry();
        let archive = InputArchive::from_records([node_record(1, 2), node_record(2, 0)].into_iter().collect(), &registry);

        let first = archive.get(ObjectId::PRIMARY).unwrap().unwrap();
        let second = archive.get(ObjectId::PRIMARY).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // The child was built while building the parent and is shared.
        assert!(archive.is_cached(ObjectId::new(2)));
        let parent = archive.primary_as::<Node>().unwrap();
        let child = archive.get_as::<Node>(ObjectId::new(2)).unwrap().unwrap();
        assert!(Arc::ptr_eq(parent.child.as_ref().unwrap(), &child));
    }

    #[test]
    fn missing_object() {
        let registry = registry();
        let archive = InputArchive::from_records([node_record(1, 7)].into_iter().collect(), &registry);
        let err = archive.primary().unwrap_err();
        assert!(matches!(err, ArchiveError::MissingObject(id) if id == ObjectId::new(7)));
        assert!(!archive.is_cached(ObjectId::PRIMARY));
    }

    #[test]
    fn unregistered_name() {
        let registry = FactoryRegistry::new();
        let archive = InputArchive::from_records([node_record(1, 0)].into_iter().collect(), &registry);
        let err = archive.primary().unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { ref name } if name == "Node"));
    }

    #[test]
    fn cycle_is_detected() {
        let registry = registry();
        let archive = InputArchive::from_records([node_record(1, 2), node_record(2, 1)].into_iter().collect(), &registry);
        let err = archive.primary().unwrap_err();
        assert!(matches!(err, ArchiveError::CyclicRead(id) if id == ObjectId::PRIMARY));
        assert!(err.is_bad_archive());
    }

    #[test]
    fn wrong_type() {
        #[derive(Debug)]
        struct Other;
        impl Persistable for Other {}

        let registry = registry();
        let archive = InputArchive::from_records([node_record(1, 0)].into_iter().collect(), &registry);
        let err = archive.get_as::<Other>(ObjectId::PRIMARY).unwrap_err();
        assert!(matches!(err, ArchiveError::TypeMismatch { .. }));
    }
}
