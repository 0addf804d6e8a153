//! Logging for the pressgit node.
//!
//! ```rust,no_run
//! use pressgit_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::parse("json"));
//! ```

mod logging;

pub use logging::{default_filter, init_logging, LogFormat};
