//! # pressgit node
//!
//! Runs a pressgit repository as a git smart HTTP (protocol v2) endpoint and
//! drives pulls and pushes against remote repositories.
//!
//! ## Modules
//!
//! - [`api`] - axum router serving `HEAD`, `info/refs` and `git-upload-pack`
//! - [`config`] - Node configuration loaded from YAML
//! - [`observability`] - Structured logging setup
//! - [`transport`] - Blocking HTTP transport for the protocol client

pub mod api;
pub mod config;
pub mod observability;
pub mod transport;
