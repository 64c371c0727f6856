use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::ArchiveError;
use crate::input::InputArchive;
use crate::output::OutputArchiveHandle;
use crate::record::Record;

/// Type-erasure helper so shared instances can be downcast after reading.
///
/// Implemented for every `'static + Send + Sync` type; never implement it by hand.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A value that can be written to an archive.
///
/// A type opts in by returning a non-empty [`persistence_name`] and
/// implementing [`write`]. The name is the key its factory is registered under
/// in the [`FactoryRegistry`](crate::FactoryRegistry), so it must be stable
/// across builds.
///
/// `write` emits scalar fields with [`OutputArchiveHandle::set`] and obtains
/// ids for sub-objects with [`OutputArchiveHandle::put`] or
/// [`OutputArchiveHandle::set_link`]; sub-objects are written before the
/// object that references them.
///
/// [`persistence_name`]: Persistable::persistence_name
/// [`write`]: Persistable::write
pub trait Persistable: AsAny + Debug {
    /// Registry key for this type. Empty means "not persistable".
    fn persistence_name(&self) -> &str {
        ""
    }

    /// Whether this particular instance can be written.
    ///
    /// Types that are only conditionally persistable (e.g. wrappers around
    /// something that may not be) override this.
    fn is_persistable(&self) -> bool {
        !self.persistence_name().is_empty()
    }

    /// Writes this object's record.
    ///
    /// The default fails: calling it means the archive was handed an object
    /// that never implemented persistence.
    fn write(&self, _handle: &mut OutputArchiveHandle<'_>) -> Result<(), ArchiveError> {
        if self.is_persistable() {
            Err(ArchiveError::Logic(format!(
                "'{}' declares a persistence name but does not implement write",
                self.persistence_name()
            )))
        } else {
            Err(ArchiveError::Logic(
                "table-based persistence is not supported for this object".to_string(),
            ))
        }
    }
}

/// The read side of a concrete [`Persistable`] type.
///
/// Implementing this (or deriving it with `#[derive(Persistable)]`) lets the
/// type be registered with [`FactoryRegistry::register_type`](crate::FactoryRegistry::register_type).
pub trait Reconstruct: Persistable + Sized {
    /// Must equal what [`Persistable::persistence_name`] returns.
    const PERSISTENCE_NAME: &'static str;

    /// Rebuilds one instance from its record.
    ///
    /// Child references are resolved through `archive`, which returns the
    /// instance shared with every other parent of that child.
    fn reconstruct(archive: &InputArchive<'_>, record: &Record) -> Result<Self, ArchiveError>;
}

/// Something that names a (possibly absent) object to put into an archive.
pub trait ObjectRef {
    fn to_object(&self) -> Option<Arc<dyn Persistable>>;
}

impl<T: Persistable> ObjectRef for Arc<T> {
    fn to_object(&self) -> Option<Arc<dyn Persistable>> {
        let object: Arc<dyn Persistable> = self.clone();
        Some(object)
    }
}

impl ObjectRef for Arc<dyn Persistable> {
    fn to_object(&self) -> Option<Arc<dyn Persistable>> {
        Some(Arc::clone(self))
    }
}

impl<R: ObjectRef> ObjectRef for Option<R> {
    fn to_object(&self) -> Option<Arc<dyn Persistable>> {
        self.as_ref().and_then(ObjectRef::to_object)
    }
}

/// Address-based identity of a shared object.
pub(crate) fn identity(object: &Arc<dyn Persistable>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}
