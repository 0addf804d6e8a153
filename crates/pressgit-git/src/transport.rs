//! HTTP seams between the protocol logic and the network.
//!
//! The client speaks to an [`HttpTransport`], which turns a request into a
//! stream of [`TransportEvent`]s. The server writes into a
//! [`ResponseWriter`]. Neither side knows which HTTP stack sits underneath.

use crate::{GitError, Result};
use bytes::{Bytes, BytesMut};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL, including any query string.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl HttpRequest {
    /// A GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// A POST request with a body.
    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One step of an HTTP exchange as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Status line and headers arrived.
    Headers {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: Vec<(String, String)>,
    },
    /// A piece of the response body.
    BodyChunk(Bytes),
    /// The exchange failed.
    Failure(String),
}

/// Performs HTTP exchanges for the client.
pub trait HttpTransport {
    /// Events produced by one exchange.
    type Events: Iterator<Item = TransportEvent>;

    /// Sends `request` and returns the events of the response.
    fn execute(&self, request: HttpRequest) -> Self::Events;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &T {
    type Events = T::Events;

    fn execute(&self, request: HttpRequest) -> Self::Events {
        (**self).execute(request)
    }
}

/// A complete HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Collects transport events into a successful response.
///
/// A failure event, a missing status, or a non-2xx status is an error.
pub fn read_response<I>(url: &str, events: I) -> Result<HttpResponse>
where
    I: IntoIterator<Item = TransportEvent>,
{
    let mut head: Option<(u16, Vec<(String, String)>)> = None;
    let mut body = BytesMut::new();
    for event in events {
        match event {
            TransportEvent::Headers { status, headers } => {
                if head.is_some() {
                    return Err(GitError::Transport(format!(
                        "{}: headers received twice",
                        url
                    )));
                }
                head = Some((status, headers));
            }
            TransportEvent::BodyChunk(chunk) => {
                if head.is_none() {
                    return Err(GitError::Transport(format!(
                        "{}: body arrived before headers",
                        url
                    )));
                }
                body.extend_from_slice(&chunk);
            }
            TransportEvent::Failure(reason) => {
                return Err(GitError::Transport(format!("{}: {}", url, reason)));
            }
        }
    }

    let (status, headers) =
        head.ok_or_else(|| GitError::Transport(format!("{}: no response", url)))?;
    let body = body.freeze();
    if !(200..300).contains(&status) {
        let detail = String::from_utf8_lossy(&body);
        return Err(GitError::Transport(format!(
            "{}: HTTP {} {}",
            url,
            status,
            detail.trim()
        )));
    }
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// Sink for a server response.
pub trait ResponseWriter {
    /// Sets the status code; defaults to 200.
    fn set_status(&mut self, status: u16);

    /// Adds a response header.
    fn send_header(&mut self, name: &str, value: &str);

    /// Appends body bytes.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Completes the response.
    fn end(&mut self) -> Result<()>;
}

/// A [`ResponseWriter`] that keeps everything in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferingResponseWriter {
    /// Status code.
    pub status: u16,
    /// Headers in the order they were sent.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
    /// Whether `end` was called.
    pub ended: bool,
}

impl Default for BufferingResponseWriter {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            ended: false,
        }
    }
}

impl BufferingResponseWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl ResponseWriter for BufferingResponseWriter {
    fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    fn send_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.ended {
            return Err(GitError::Transport("write after end".to_string()));
        }
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.ended = true;
        Ok(())
    }
}
