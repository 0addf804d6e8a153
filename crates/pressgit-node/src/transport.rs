//! Blocking HTTP transport for [`GitClient`](pressgit_git::GitClient).

use bytes::Bytes;
use pressgit_git::{HttpMethod, HttpRequest, HttpTransport, TransportEvent};
use std::io::Read;
use std::time::Duration;

const CHUNK_SIZE: usize = 64 * 1024;

/// Sends client requests with a `reqwest` blocking client.
///
/// Must not be used from inside an async runtime.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(pressgit_git::DEFAULT_AGENT)
            .build()?;
        Ok(Self { client })
    }

    fn send(&self, request: HttpRequest) -> reqwest::Result<reqwest::blocking::Response> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url).body(request.body.to_vec()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.send()
    }
}

/// Streams a response as transport events: headers first, then the body
/// in chunks.
#[derive(Debug)]
pub struct ResponseEvents {
    head: Option<TransportEvent>,
    body: Option<reqwest::blocking::Response>,
}

impl Iterator for ResponseEvents {
    type Item = TransportEvent;

    fn next(&mut self) -> Option<TransportEvent> {
        if let Some(head) = self.head.take() {
            return Some(head);
        }
        let response = self.body.as_mut()?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match response.read(&mut buf) {
            Ok(0) => {
                self.body = None;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(TransportEvent::BodyChunk(Bytes::from(buf)))
            }
            Err(e) => {
                self.body = None;
                Some(TransportEvent::Failure(e.to_string()))
            }
        }
    }
}

impl HttpTransport for ReqwestTransport {
    type Events = ResponseEvents;

    fn execute(&self, request: HttpRequest) -> ResponseEvents {
        let url = request.url.clone();
        match self.send(request) {
            Ok(response) => {
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_string(), v.to_string()))
                    })
                    .collect();
                tracing::debug!(url = %url, status = response.status().as_u16(), "Response received");
                ResponseEvents {
                    head: Some(TransportEvent::Headers {
                        status: response.status().as_u16(),
                        headers,
                    }),
                    body: Some(response),
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Request failed");
                ResponseEvents {
                    head: Some(TransportEvent::Failure(e.to_string())),
                    body: None,
                }
            }
        }
    }
}
