//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in the byte storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The requested reference does not exist.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// An object could not be encoded or decoded.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// A reference name or reference file is malformed.
    #[error("invalid reference: {0}")]
    InvalidRef(String),

    /// A tree path is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A tree path does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A commit range walk reached a root before the expected ancestor.
    #[error("{ancestor} is not an ancestor of {head}")]
    NotAnAncestor {
        /// The ancestor that was expected on the line of descent.
        ancestor: String,
        /// The commit the walk started from.
        head: String,
    },

    /// HEAD does not point at a branch.
    #[error("HEAD is detached; commits require a checked-out branch")]
    DetachedHead,

    /// The repository config file is malformed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
