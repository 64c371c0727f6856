use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one persisted object within a single archive.
///
/// Ids are assigned sequentially starting at 1 in the order objects are first
/// handed to an [`OutputArchive`](crate::OutputArchive). `0` is reserved for
/// "no object" and is what a null reference serializes to.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The null reference.
    pub const NULL: ObjectId = ObjectId(0);

    /// The id the first object put into an archive always receives.
    pub const PRIMARY: ObjectId = ObjectId(1);

    /// Creates an id from its raw value.
    pub const fn new(raw: u64) -> Self {
        ObjectId(raw)
    }

    /// Returns the raw integer value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true for the null reference.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Zero-based slot of a non-null id.
    pub(crate) fn index(self) -> usize {
        debug_assert!(!self.is_null());
        (self.0 - 1) as usize
    }

    /// Id stored in the given zero-based slot.
    pub(crate) fn from_index(index: usize) -> Self {
        ObjectId(index as u64 + 1)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ObjectId> for u64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}
