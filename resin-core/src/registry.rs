//! Name-keyed factories that turn records back into objects.
//!
//! The registry has two phases. While building, each concrete type registers
//! exactly one factory under its persistence name. Once [`install`]ed (or
//! first read through [`global`]) the process-wide instance is frozen and
//! shared without locking.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use log::debug;

use crate::error::ArchiveError;
use crate::input::InputArchive;
use crate::persistable::{Persistable, Reconstruct};
use crate::record::Record;

/// Rebuilds one object from its record.
pub trait PersistableFactory: Send + Sync {
    fn read(&self, archive: &InputArchive<'_>, record: &Record) -> Result<Arc<dyn Persistable>, ArchiveError>;
}

impl<F> PersistableFactory for F
where
    F: Fn(&InputArchive<'_>, &Record) -> Result<Arc<dyn Persistable>, ArchiveError> + Send + Sync,
{
    fn read(&self, archive: &InputArchive<'_>, record: &Record) -> Result<Arc<dyn Persistable>, ArchiveError> {
        self(archive, record)
    }
}

/// Factory for any [`Reconstruct`] type.
struct ReconstructFactory<T>(PhantomData<fn() -> T>);

impl<T: Reconstruct> PersistableFactory for ReconstructFactory<T> {
    fn read(&self, archive: &InputArchive<'_>, record: &Record) -> Result<Arc<dyn Persistable>, ArchiveError> {
        let object: Arc<dyn Persistable> = Arc::new(T::reconstruct(archive, record)?);
        Ok(object)
    }
}

/// Mapping from persistence name to factory.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, Box<dyn PersistableFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`.
    ///
    /// The first registration of a name wins; later ones are rejected with
    /// [`ArchiveError::DuplicateFactory`].
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl PersistableFactory + 'static,
    ) -> Result<(), ArchiveError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ArchiveError::Logic(
                "cannot register a factory under an empty persistence name".to_string(),
            ));
        }
        if self.factories.contains_key(&name) {
            return Err(ArchiveError::DuplicateFactory(name));
        }
        debug!("registered persistable factory '{}'", name);
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Registers `T` under [`Reconstruct::PERSISTENCE_NAME`].
    pub fn register_type<T: Reconstruct>(&mut self) -> Result<(), ArchiveError> {
        self.register(T::PERSISTENCE_NAME, ReconstructFactory::<T>(PhantomData))
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn PersistableFactory, ArchiveError> {
        self.factories
            .get(name)
            .map(|factory| factory.as_ref())
            .ok_or_else(|| ArchiveError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("names", &self.names())
            .finish()
    }
}

static GLOBAL: OnceLock<FactoryRegistry> = OnceLock::new();

/// Installs the process-wide registry.
///
/// Fails if a registry was already installed or [`global`] was already read.
pub fn install(registry: FactoryRegistry) -> Result<&'static FactoryRegistry, ArchiveError> {
    let count = registry.len();
    GLOBAL
        .set(registry)
        .map_err(|_| ArchiveError::Logic("process-wide factory registry is already installed".to_string()))?;
    debug!("installed process-wide factory registry with {} factories", count);
    Ok(global())
}

/// The process-wide registry; empty (and frozen) if nothing was installed.
pub fn global() -> &'static FactoryRegistry {
    GLOBAL.get_or_init(FactoryRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ObjectId;
    use crate::record::Payload;

    #[derive(Debug)]
    struct Marker;

    impl Persistable for Marker {
        fn persistence_name(&self) -> &str {
            "Marker"
        }
    }

    fn marker_factory(
        _archive: &InputArchive<'_>,
        _record: &Record,
    ) -> Result<Arc<dyn Persistable>, ArchiveError> {
        Ok(Arc::new(Marker))
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = FactoryRegistry::new();
        registry.register("Marker", marker_factory).unwrap();

        assert!(registry.contains("Marker"));
        assert_eq!(registry.len(), 1);

        let empty = FactoryRegistry::new();
        let archive = InputArchive::empty(&empty);
        let record = Record::new(ObjectId::PRIMARY, "Marker", Payload::new());
        let object = registry.lookup("Marker").unwrap().read(&archive, &record).unwrap();
        assert_eq!(object.persistence_name(), "Marker");
    }

    #[test]
    fn lookup_missing_names_the_tag() {
        let registry = FactoryRegistry::new();
        let err = registry.lookup("SkyWcs").err().unwrap();
        assert!(matches!(err, ArchiveError::NotFound { ref name } if name == "SkyWcs"));
        assert!(err.is_bad_archive());
    }

    #[test]
    fn first_registration_wins() {
        let mut registry = FactoryRegistry::new();
        registry.register("Marker", marker_factory).unwrap();
        let err = registry.register("Marker", marker_factory).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateFactory(ref name) if name == "Marker"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_name_rejected() {
        let mut registry = FactoryRegistry::new();
        assert!(registry.register("", marker_factory).unwrap_err().is_logic_error());
    }

    #[test]
    fn names_sorted() {
        let mut registry = FactoryRegistry::new();
        registry.register("b", marker_factory).unwrap();
        registry.register("a", marker_factory).unwrap();
        assert_eq!(registry.names(), ["a", "b"]);
    }
}
