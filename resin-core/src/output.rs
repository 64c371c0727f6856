use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use ciborium::Value;
use log::{debug, trace, warn};
use serde::Serialize;

use crate::container::ContainerWriter;
use crate::error::ArchiveError;
use crate::id::ObjectId;
use crate::link::Link;
use crate::manifest;
use crate::options::WriteOptions;
use crate::persistable::{ObjectRef, Persistable, identity};
use crate::record::{Payload, Record};

/// Write side of one persistence session.
///
/// Objects are identified by allocation, not by value: two equal but distinct
/// instances get two ids, while one instance reachable through several parents
/// is written once. The archive keeps every object it has seen alive until it
/// is flushed, so an address can never be reused within a session.
///
/// ```
/// use std::sync::Arc;
/// use resin_core::{ContainerWriter, MemFile, ObjectId, OutputArchive, OutputArchiveHandle, Persistable, ArchiveError};
///
/// #[derive(Debug)]
/// struct Scale(f64);
///
/// impl Persistable for Scale {
///     fn persistence_name(&self) -> &str {
///         "Scale"
///     }
///
///     fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
///         handle.set("factor", &self.0)
///     }
/// }
///
/// let scale = Arc::new(Scale(2.0));
/// let mut archive = OutputArchive::new();
/// assert_eq!(archive.put(&scale).unwrap(), ObjectId::PRIMARY);
/// assert_eq!(archive.put(&scale).unwrap(), ObjectId::PRIMARY);
///
/// let mut writer = ContainerWriter::new(MemFile::new()).unwrap();
/// archive.flush(&mut writer).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct OutputArchive {
    options: WriteOptions,
    ids: HashMap<usize, ObjectId>,
    objects: Vec<Arc<dyn Persistable>>,
    /// One slot per assigned id; `None` while the object is still being written.
    records: Vec<Option<Record>>,
}

impl OutputArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: WriteOptions) -> Self {
        OutputArchive {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &WriteOptions {
        &self.options
    }

    /// Writes an object and everything it references, returning its id.
    ///
    /// Null references get [`ObjectId::NULL`]. Putting an object that is
    /// already in the archive returns its existing id without rewriting it.
    /// Non-persistable objects are a logic error unless the archive is
    /// permissive, in which case they are written as null.
    ///
    /// If anything fails, every id assigned during this call is released and
    /// the archive is left as it was.
    pub fn put<R: ObjectRef + ?Sized>(&mut self, object: &R) -> Result<ObjectId, ArchiveError> {
        let permissive = self.options.permissive;
        self.put_top_level(object, permissive)
    }

    /// Like [`put`](OutputArchive::put), but writes `object` as null if it is
    /// not persistable, regardless of the archive's options.
    ///
    /// Only `object` itself is affected: what it puts while writing follows
    /// the archive's options.
    pub fn put_permissive<R: ObjectRef + ?Sized>(&mut self, object: &R) -> Result<ObjectId, ArchiveError> {
        self.put_top_level(object, true)
    }

    fn put_top_level<R: ObjectRef + ?Sized>(&mut self, object: &R, permissive: bool) -> Result<ObjectId, ArchiveError> {
        let Some(object) = object.to_object() else {
            return Ok(ObjectId::NULL);
        };
        let mark = self.records.len();
        let result = self.put_object(object, permissive);
        if result.is_err() {
            self.rollback(mark);
        }
        result
    }

    fn put_object(&mut self, object: Arc<dyn Persistable>, permissive: bool) -> Result<ObjectId, ArchiveError> {
        let address = identity(&object);
        if let Some(&id) = self.ids.get(&address) {
            if self.records[id.index()].is_none() {
                return Err(ArchiveError::CyclicWrite(id));
            }
            return Ok(id);
        }

        if !object.is_persistable() {
            if permissive {
                warn!("writing non-persistable object as null: {:?}", object);
                return Ok(ObjectId::NULL);
            }
            return Err(ArchiveError::Logic(format!(
                "object is not persistable: {:?}",
                object
            )));
        }

        let id = ObjectId::from_index(self.records.len());
        let name = object.persistence_name().to_string();
        self.ids.insert(address, id);
        self.objects.push(Arc::clone(&object));
        self.records.push(None);
        trace!("writing object {} ('{}')", id, name);

        let mut handle = OutputArchiveHandle {
            archive: self,
            id,
            payload: Payload::new(),
        };
        object.write(&mut handle)?;
        let payload = handle.payload;

        self.records[id.index()] = Some(Record::new(id, name, payload));
        Ok(id)
    }

    fn rollback(&mut self, mark: usize) {
        debug!("rolling back {} object(s) after failed put", self.records.len() - mark);
        self.records.truncate(mark);
        self.objects.truncate(mark);
        self.ids.retain(|_, id| id.index() < mark);
    }

    /// Id already assigned to `object`, if any.
    pub fn id_of<R: ObjectRef + ?Sized>(&self, object: &R) -> Option<ObjectId> {
        let object = object.to_object()?;
        self.ids.get(&identity(&object)).copied()
    }

    pub fn contains<R: ObjectRef + ?Sized>(&self, object: &R) -> bool {
        self.id_of(object).is_some()
    }

    /// Number of records written so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The finished record for `id`.
    pub fn record(&self, id: ObjectId) -> Option<&Record> {
        if id.is_null() {
            return None;
        }
        self.records.get(id.index()).and_then(Option::as_ref)
    }

    /// Writes every record to the container and ends the session.
    ///
    /// Returns the HDU index of the archive's manifest, which is what a reader
    /// must seek to when several archives share one container.
    pub fn flush<W: Write>(self, writer: &mut ContainerWriter<W>) -> Result<usize, ArchiveError> {
        let count = self.records.len();
        let records = self
            .records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                record.ok_or_else(|| {
                    ArchiveError::Logic(format!(
                        "object {} was never finished",
                        ObjectId::from_index(index)
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let hdu = manifest::write(writer, records)?;
        debug!("flushed archive with {} object(s) at HDU {}", count, hdu);
        Ok(hdu)
    }

    /// A handle not attached to any object, for exercising `write` directly.
    #[cfg(test)]
    pub(crate) fn detached_handle(&mut self) -> OutputArchiveHandle<'_> {
        OutputArchiveHandle {
            archive: self,
            id: ObjectId::NULL,
            payload: Payload::new(),
        }
    }
}

/// What [`Persistable::write`] uses to emit a record.
///
/// Scalar fields go in with [`set`](OutputArchiveHandle::set); sub-objects are
/// written through [`put`](OutputArchiveHandle::put) or
/// [`set_link`](OutputArchiveHandle::set_link), which resolve them to ids
/// before the current record is finished.
#[derive(Debug)]
pub struct OutputArchiveHandle<'a> {
    archive: &'a mut OutputArchive,
    id: ObjectId,
    payload: Payload,
}

impl OutputArchiveHandle<'_> {
    /// Id of the object being written.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Writes a sub-object (if not already written) and returns its id.
    pub fn put<R: ObjectRef + ?Sized>(&mut self, object: &R) -> Result<ObjectId, ArchiveError> {
        match object.to_object() {
            Some(object) => {
                let permissive = self.archive.options.permissive;
                self.archive.put_object(object, permissive)
            }
            None => Ok(ObjectId::NULL),
        }
    }

    /// Like [`put`](OutputArchiveHandle::put), writing `object` as null if it
    /// is not persistable. Its own sub-objects follow the archive's options.
    pub fn put_permissive<R: ObjectRef + ?Sized>(&mut self, object: &R) -> Result<ObjectId, ArchiveError> {
        match object.to_object() {
            Some(object) => self.archive.put_object(object, true),
            None => Ok(ObjectId::NULL),
        }
    }

    /// Sets a scalar field of the current record.
    pub fn set<T: Serialize + ?Sized>(&mut self, field: &str, value: &T) -> Result<(), ArchiveError> {
        let value = Value::serialized(value)
            .map_err(|e| ArchiveError::Encode(format!("field '{}' of object {}: {}", field, self.id, e)))?;
        if self.payload.insert(field, value).is_some() {
            return Err(ArchiveError::Logic(format!(
                "field '{}' of object {} written twice",
                field, self.id
            )));
        }
        Ok(())
    }

    /// Writes the objects a link refers to and stores their ids in a field.
    pub fn set_link<L: Link>(&mut self, field: &str, link: &L) -> Result<(), ArchiveError> {
        let ids = link.put_link(self)?;
        self.set(field, &ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Leaf(i32);

    impl Persistable for Leaf {
        fn persistence_name(&self) -> &str {
            "Leaf"
        }

        fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
            handle.set("value", &self.0)
        }
    }

    #[derive(Debug)]
    struct Pair {
        left: Arc<Leaf>,
        right: Option<Arc<dyn Persistable>>,
    }

    impl Persistable for Pair {
        fn persistence_name(&self) -> &str {
            "Pair"
        }

        fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
            handle.set_link("left", &self.left)?;
            handle.set_link("right", &self.right)
        }
    }

    #[derive(Debug)]
    struct Opaque;

    impl Persistable for Opaque {}

    /// A node whose child can be set after construction, so tests can build cycles.
    #[derive(Debug)]
    struct Loop {
        next: Mutex<Option<Arc<Loop>>>,
    }

    impl Persistable for Loop {
        fn persistence_name(&self) -> &str {
            "Loop"
        }

        fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
            let next = self.next.lock().unwrap().clone();
            handle.set_link("next", &next)
        }
    }

    #[test]
    fn null_is_zero() {
        let mut archive = OutputArchive::new();
        let none: Option<Arc<Leaf>> = None;
        assert_eq!(archive.put(&none).unwrap(), ObjectId::NULL);
        assert!(archive.is_empty());
    }

    #[test]
    fn first_put_is_primary() {
        let mut archive = OutputArchive::new();
        let id = archive.put(&Arc::new(Leaf(3))).unwrap();
        assert_eq!(id, ObjectId::PRIMARY);
    }

    #[test]
    fn put_is_idempotent() {
        let mut archive = OutputArchive::new();
        let leaf = Arc::new(Leaf(1));
        let first = archive.put(&leaf).unwrap();
        let second = archive.put(&leaf.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn equal_values_are_distinct_objects() {
        let mut archive = OutputArchive::new();
        let a = archive.put(&Arc::new(Leaf(1))).unwrap();
        let b = archive.put(&Arc::new(Leaf(1))).unwrap();
        assert_ne!(a, b);
        assert_eq!(archive.len(), 2);
    }

    #[test]
    fn children_get_later_ids_and_finish_first() {
        let mut archive = OutputArchive::new();
        let pair = Arc::new(Pair {
            left: Arc::new(Leaf(1)),
            right: Some(Arc::new(Leaf(2))),
        });
        assert_eq!(archive.put(&pair).unwrap(), ObjectId::PRIMARY);
        assert_eq!(archive.len(), 3);

        let record = archive.record(ObjectId::PRIMARY).unwrap();
        assert_eq!(record.name(), "Pair");
        assert_eq!(record.get::<ObjectId>("left").unwrap(), ObjectId::new(2));
        assert_eq!(record.get::<ObjectId>("right").unwrap(), ObjectId::new(3));
        assert!(archive.contains(&pair.left));
    }

    #[test]
    fn non_persistable_is_logic_error_and_rolls_back() {
        let mut archive = OutputArchive::new();
        let pair = Arc::new(Pair {
            left: Arc::new(Leaf(1)),
            right: Some(Arc::new(Opaque)),
        });
        let err = archive.put(&pair).unwrap_err();
        assert!(err.is_logic_error());
        assert!(archive.is_empty());
        assert!(!archive.contains(&pair.left));

        // The archive is still usable and ids restart where they were.
        assert_eq!(archive.put(&Arc::new(Leaf(9))).unwrap(), ObjectId::PRIMARY);
    }

    #[test]
    fn permissive_writes_null() {
        let mut archive = OutputArchive::with_options(WriteOptions { permissive: true });
        let pair = Arc::new(Pair {
            left: Arc::new(Leaf(1)),
            right: Some(Arc::new(Opaque)),
        });
        archive.put(&pair).unwrap();
        let record = archive.record(ObjectId::PRIMARY).unwrap();
        assert_eq!(record.get::<ObjectId>("right").unwrap(), ObjectId::NULL);

        let mut strict = OutputArchive::new();
        assert_eq!(strict.put_permissive(&Arc::new(Opaque)).unwrap(), ObjectId::NULL);
    }

    /// Puts its child with a plain, non-permissive `put`.
    #[derive(Debug)]
    struct Holder {
        child: Arc<dyn Persistable>,
    }

    impl Persistable for Holder {
        fn persistence_name(&self) -> &str {
            "Holder"
        }

        fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
            let child = handle.put(&self.child)?;
            handle.set("child", &child)
        }
    }

    #[test]
    fn permissive_put_does_not_reach_children() {
        let holder = Arc::new(Holder {
            child: Arc::new(Opaque),
        });

        let mut archive = OutputArchive::new();
        let err = archive.put_permissive(&holder).unwrap_err();
        assert!(err.is_logic_error());
        assert!(archive.is_empty());

        // Same through a handle: the permissive put covers only the holder.
        #[derive(Debug)]
        struct Outer(Arc<Holder>);

        impl Persistable for Outer {
            fn persistence_name(&self) -> &str {
                "Outer"
            }

            fn write(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
                let inner = handle.put_permissive(&self.0)?;
                handle.set("inner", &inner)
            }
        }

        let err = archive.put(&Arc::new(Outer(holder.clone()))).unwrap_err();
        assert!(err.is_logic_error());
        assert!(archive.is_empty());

        // A permissive archive still nulls the child.
        let mut lenient = OutputArchive::with_options(WriteOptions { permissive: true });
        lenient.put(&holder).unwrap();
        let record = lenient.record(ObjectId::PRIMARY).unwrap();
        assert_eq!(record.get::<ObjectId>("child").unwrap(), ObjectId::NULL);
    }

    #[test]
    fn cycle_is_detected() {
        let a = Arc::new(Loop {
            next: Mutex::new(None),
        });
        let b = Arc::new(Loop {
            next: Mutex::new(Some(a.clone())),
        });
        *a.next.lock().unwrap() = Some(b.clone());

        let mut archive = OutputArchive::new();
        let err = archive.put(&a).unwrap_err();
        assert!(matches!(err, ArchiveError::CyclicWrite(id) if id == ObjectId::PRIMARY));
        assert!(archive.is_empty());

        // Break the cycle so the Arcs can be freed.
        *a.next.lock().unwrap() = None;
    }

    #[test]
    fn duplicate_field_is_logic_error() {
        let mut archive = OutputArchive::new();
        let mut handle = archive.detached_handle();
        handle.set("x", &1).unwrap();
        assert!(handle.set("x", &2).unwrap_err().is_logic_error());
    }
}
