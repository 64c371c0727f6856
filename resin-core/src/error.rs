use crate::id::ObjectId;

/// Broad classification of an [`ArchiveError`].
///
/// Tooling uses this to tell a corrupt or foreign archive apart from a defect
/// in the code doing the persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The calling code broke the persistence contract.
    Logic,
    /// The archive being read is corrupt, foreign, or needs a type this build
    /// does not know.
    BadArchive,
    /// The underlying file or buffer failed.
    Io,
}

/// Error type for archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("logic error: {0}")]
    Logic(String),
    #[error("cyclic reference while writing object {0}")]
    CyclicWrite(ObjectId),
    #[error("factory already registered for '{0}'")]
    DuplicateFactory(String),
    #[error("encode error: {0}")]
    Encode(String),

    #[error("factory with name '{name}' not found")]
    NotFound { name: String },
    #[error("no record for object {0}")]
    MissingObject(ObjectId),
    #[error("record {id} ('{name}') has no field '{field}'")]
    MissingField {
        id: ObjectId,
        name: String,
        field: String,
    },
    #[error("object {id} is not a {expected}")]
    TypeMismatch { id: ObjectId, expected: &'static str },
    #[error("cyclic reference while reading object {0}")]
    CyclicRead(ObjectId),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("HDU {index} out of range ({count} present)")]
    NoSuchHdu { index: usize, count: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Logic(_)
            | ArchiveError::CyclicWrite(_)
            | ArchiveError::DuplicateFactory(_)
            | ArchiveError::Encode(_) => ErrorKind::Logic,
            ArchiveError::NotFound { .. }
            | ArchiveError::MissingObject(_)
            | ArchiveError::MissingField { .. }
            | ArchiveError::TypeMismatch { .. }
            | ArchiveError::CyclicRead(_)
            | ArchiveError::Decode(_)
            | ArchiveError::Corrupt(_)
            | ArchiveError::NoSuchHdu { .. } => ErrorKind::BadArchive,
            ArchiveError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_logic_error(&self) -> bool {
        self.kind() == ErrorKind::Logic
    }

    pub fn is_bad_archive(&self) -> bool {
        self.kind() == ErrorKind::BadArchive
    }
}
