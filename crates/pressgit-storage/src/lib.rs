//! Git object storage for pressgit.
//!
//! This crate provides content-addressed storage for git objects
//! (blobs, trees, commits) on top of a pluggable byte storage, plus
//! reference management, repository config, and commit-graph operations.

mod backend;
mod commit;
mod config;
mod error;
mod object;
mod refs;
mod repository;
mod store;
mod tree;
mod walk;

pub use backend::{ByteStorage, LocalStorage, MemoryStorage};
pub use commit::{Commit, Signature};
pub use config::{RepoConfig, CONFIG_PATH};
pub use error::StorageError;
pub use object::{parse_header, wrap, GitObject, ObjectId, ObjectType, RawObject};
pub use refs::{validate_ref_name, RefStore, Reference, HEADS_PREFIX, REMOTES_PREFIX};
pub use repository::{
    CommitOutcome, CommitRequest, CommitRewrite, Repository, DEFAULT_BRANCH, DEFAULT_MESSAGE,
};
pub use store::{ObjectReader, ObjectStore, READ_CHUNK_SIZE};
pub use tree::{FileMode, Tree, TreeEntry};
pub use walk::{AddedObject, AddedObjects, TreeChange};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
