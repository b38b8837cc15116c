mod block;
mod blockstore;
mod chunker;
mod datastore;
mod dag;
mod file_source;
mod indexer;
mod manager;
mod mount_source;
mod record;
mod s3_source;
mod source;
mod store;

pub use block::*;
pub use blockstore::*;
pub use chunker::*;
pub use dag::*;
pub use datastore::*;
pub use file_source::FileSource;
pub use indexer::*;
pub use manager::*;
pub use mount_source::{Mount, MountSource};
pub use record::*;
pub use s3_source::S3Source;
pub use source::*;
pub use store::*;

use thiserror::Error;

#[macro_use]
extern crate log;

/// Sub-code attached to a corrupt-reference error, telling the caller what
/// happened to the backing bytes of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceStatus {
    /// The backing object is gone.
    FileNotFound,
    /// The backing object ended early or its bytes no longer hash to the
    /// requested content id.
    FileChanged,
    /// Transport or I/O failure while reaching the backing object.
    FileError,
    /// Malformed record, path escape, or policy rejection.
    OtherError,
}

impl std::fmt::Display for ReferenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReferenceStatus::FileNotFound => "file not found",
            ReferenceStatus::FileChanged => "file changed",
            ReferenceStatus::FileError => "file error",
            ReferenceStatus::OtherError => "other error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("corrupt reference ({0}): {1}")]
    CorruptReference(ReferenceStatus, String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_corrupt_reference(&self) -> bool {
        matches!(self, StoreError::CorruptReference(_, _))
    }

    /// Sub-code of a corrupt-reference error, if this is one.
    pub fn reference_status(&self) -> Option<ReferenceStatus> {
        match self {
            StoreError::CorruptReference(status, _) => Some(*status),
            _ => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod test_remote_store;
