//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pack file format.
    #[error("invalid pack file: {0}")]
    InvalidPack(String),

    /// Invalid delta instruction stream.
    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Delta records whose bases never became available.
    #[error("{remaining} delta object(s) could not be resolved, first at pack offset {offset}")]
    UnresolvedDeltas {
        /// Number of records left unresolved.
        remaining: usize,
        /// Pack offset of the first unresolved record.
        offset: usize,
    },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A fetch filter other than `blob:none` or `blob:limit=<n>`.
    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// A request for a service or path this server does not provide.
    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    /// The remote reported a fatal error on the side-band.
    #[error("remote error: {0}")]
    RemoteFatal(String),

    /// The remote did not accept a push.
    #[error("push rejected: {response}")]
    PushRejected {
        /// The raw report from the remote.
        response: String,
    },

    /// The local branch is not exactly one commit ahead of its tracking ref.
    #[error("branch {branch} must be exactly one commit ahead of {tracking}")]
    PushNotSingleCommit {
        /// Local branch name.
        branch: String,
        /// Remote tracking ref it was compared against.
        tracking: String,
    },

    /// The HTTP transport failed or returned an error status.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] pressgit_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// HTTP status a server should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnsupportedService(_) => 404,
            Self::Protocol(_)
            | Self::UnsupportedFilter(_)
            | Self::InvalidPktLine(_)
            | Self::InvalidPack(_)
            | Self::InvalidDelta(_) => 400,
            _ => 500,
        }
    }
}
