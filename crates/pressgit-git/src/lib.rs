//! Git wire formats and smart HTTP protocol for pressgit.
//!
//! This crate implements:
//! - Pack file encoding and decoding, including delta resolution
//! - The delta instruction format
//! - pkt-line framing and side-band multiplexing
//! - Protocol v2 `ls-refs`/`fetch` for both client and server, plus
//!   single-commit pushes to `git-receive-pack`

mod client;
mod delta;
mod error;
mod loopback;
mod pack;
mod pktline;
mod server;
mod sideband;
mod transport;

pub use client::{
    parse_fetch_response, ClientOptions, ClientState, FetchRequest, FetchResponse, GitClient,
    PullOutcome, PushOutcome,
};
pub use delta::{apply_delta, delta_sizes, encode_delta};
pub use error::GitError;
pub use loopback::LoopbackTransport;
pub use pack::{
    read_object_header, read_offset, write_object_header, write_offset, PackBuilder, PackObject,
    PackParser,
};
pub use pktline::{
    decode_all, decode_next, encode_pkt_lines, PktLine, PktLineReader, PktLineWriter, MAX_PKT_DATA,
};
pub use server::{
    parse_message, BlobFilter, GitRequest, GitServer, ProtocolMessage, ServerOptions,
    DEFAULT_AGENT,
};
pub use sideband::{
    collect_pack_data, demultiplex_sideband, encode_sideband, Channel, SidebandFrame,
    SidebandReader, MAX_SIDEBAND_DATA,
};
pub use transport::{
    read_response, BufferingResponseWriter, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    ResponseWriter, TransportEvent,
};

/// Result type for git operations.
pub type Result<T> = std::result::Result<T, GitError>;
