use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::ArchiveError;
use crate::id::ObjectId;
use crate::input::InputArchive;
use crate::output::OutputArchiveHandle;
use crate::persistable::Persistable;

/// A field that refers to other objects rather than containing them.
///
/// Links are written as the ObjectIds of their targets and resolved back to
/// the shared instances on read.
pub trait Link: Sized {
    /// What the link looks like inside a payload.
    type Ids: Serialize + DeserializeOwned;

    fn put_link(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<Self::Ids, ArchiveError>;

    fn get_link(ids: Self::Ids, archive: &InputArchive<'_>) -> Result<Self, ArchiveError>;
}

fn required<T>(id: ObjectId, resolved: Option<T>) -> Result<T, ArchiveError> {
    resolved.ok_or_else(|| ArchiveError::Corrupt(format!("null reference (id {id}) in a required link")))
}

impl<T: Persistable> Link for Arc<T> {
    type Ids = ObjectId;

    fn put_link(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<ObjectId, ArchiveError> {
        handle.put(self)
    }

    fn get_link(id: ObjectId, archive: &InputArchive<'_>) -> Result<Self, ArchiveError> {
        required(id, archive.get_as::<T>(id)?)
    }
}

impl<T: Persistable> Link for Option<Arc<T>> {
    type Ids = ObjectId;

    fn put_link(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<ObjectId, ArchiveError> {
        handle.put(self)
    }

    fn get_link(id: ObjectId, archive: &InputArchive<'_>) -> Result<Self, ArchiveError> {
        archive.get_as::<T>(id)
    }
}

impl Link for Arc<dyn Persistable> {
    type Ids = ObjectId;

    fn put_link(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<ObjectId, ArchiveError> {
        handle.put(self)
    }

    fn get_link(id: ObjectId, archive: &InputArchive<'_>) -> Result<Self, ArchiveError> {
        required(id, archive.get(id)?)
    }
}

impl Link for Option<Arc<dyn Persistable>> {
    type Ids = ObjectId;

    fn put_link(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<ObjectId, ArchiveError> {
        handle.put(self)
    }

    fn get_link(id: ObjectId, archive: &InputArchive<'_>) -> Result<Self, ArchiveError> {
        archive.get(id)
    }
}

impl<L: Link> Link for Vec<L> {
    type Ids = Vec<L::Ids>;

    fn put_link(&self, handle: &mut OutputArchiveHandle<'_>) -> Result<Self::Ids, ArchiveError> {
        self.iter().map(|link| link.put_link(handle)).collect()
    }

    fn get_link(ids: Self::Ids, archive: &InputArchive<'_>) -> Result<Self, ArchiveError> {
        ids.into_iter().map(|ids| L::get_link(ids, archive)).collect()
    }
}
