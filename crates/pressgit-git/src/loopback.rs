//! In-process transport that routes client requests to a [`GitServer`].

use crate::server::{GitRequest, GitServer};
use crate::transport::{BufferingResponseWriter, HttpRequest, HttpTransport, TransportEvent};
use bytes::Bytes;

/// Answers requests by calling a [`GitServer`] directly.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    server: GitServer,
    chunk_size: usize,
}

impl LoopbackTransport {
    /// Wraps a server.
    pub fn new(server: GitServer) -> Self {
        Self {
            server,
            chunk_size: 8192,
        }
    }

    /// Splits response bodies into chunks of at most `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The wrapped server.
    pub fn server(&self) -> &GitServer {
        &self.server
    }
}

/// Strips the scheme and authority from an absolute URL.
fn path_and_query(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => url,
    }
}

impl HttpTransport for LoopbackTransport {
    type Events = std::vec::IntoIter<TransportEvent>;

    fn execute(&self, request: HttpRequest) -> Self::Events {
        let mut git_request =
            GitRequest::new(path_and_query(&request.url)).with_body(request.body.clone());
        if let Some(protocol) = request.header_value("Git-Protocol") {
            git_request = git_request.with_git_protocol(protocol);
        }

        let mut response = BufferingResponseWriter::new();
        let mut events = Vec::new();
        match self.server.handle_request(&git_request, &mut response) {
            Ok(()) => {
                events.push(TransportEvent::Headers {
                    status: response.status,
                    headers: response.headers,
                });
                for chunk in response.body.chunks(self.chunk_size) {
                    events.push(TransportEvent::BodyChunk(Bytes::copy_from_slice(chunk)));
                }
            }
            Err(e) => {
                tracing::warn!(path = %git_request.path, error = %e, "Request failed");
                events.push(TransportEvent::Headers {
                    status: e.http_status(),
                    headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
                });
                events.push(TransportEvent::BodyChunk(Bytes::from(format!("{}\n", e))));
            }
        }
        events.into_iter()
    }
}
