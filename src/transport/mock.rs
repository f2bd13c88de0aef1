//! Mock transport for testing without a network.
//!
//! [`MockTransport`] returns pre-configured responses in order and records
//! every request it receives, allowing downstream consumers to write
//! deterministic tests against a full pipeline.
//!
//! # Example
//!
//! ```
//! use sdk_pipeline::message::HttpResponse;
//! use sdk_pipeline::transport::MockTransport;
//!
//! let mock = MockTransport::fixed(HttpResponse::new(200).with_body("{}"));
//! assert!(mock.requests().is_empty());
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Transport;
use crate::error::{PipelineError, Result};
use crate::message::{HttpRequest, HttpResponse};

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;
type SendHook = Box<dyn Fn(&HttpRequest) + Send + Sync>;

enum Canned {
    Response(HttpResponse),
    Failure(String),
}

enum Source {
    Canned(Vec<Canned>),
    Responder(Responder),
}

/// A test transport that returns canned responses in order.
///
/// Cycles back to the beginning when all responses have been consumed.
pub struct MockTransport {
    source: Source,
    index: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
    on_send: Option<SendHook>,
}

impl MockTransport {
    /// Create a mock transport with the given canned responses.
    ///
    /// Responses are returned in order. When exhausted, cycles from the beginning.
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        assert!(!responses.is_empty(), "MockTransport requires at least one response");
        Self::from_source(Source::Canned(
            responses.into_iter().map(Canned::Response).collect(),
        ))
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: HttpResponse) -> Self {
        Self::new(vec![response])
    }

    /// Create a mock whose every send fails at the transport level.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::from_source(Source::Canned(vec![Canned::Failure(message.into())]))
    }

    /// Create a mock that computes each response from the request.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Self::from_source(Source::Responder(Box::new(responder)))
    }

    /// Run `hook` on every request, before the response is produced.
    pub fn with_on_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpRequest) + Send + Sync + 'static,
    {
        self.on_send = Some(Box::new(hook));
        self
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn from_source(source: Source) -> Self {
        Self {
            source,
            index: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            on_send: None,
        }
    }

    fn next_response(&self, request: &HttpRequest) -> Result<HttpResponse> {
        match &self.source {
            Source::Canned(canned) => {
                let idx = self.index.fetch_add(1, Ordering::Relaxed) % canned.len();
                match &canned[idx] {
                    Canned::Response(response) => Ok(response.clone()),
                    Canned::Failure(message) => Err(PipelineError::Transport(message.clone())),
                }
            }
            Source::Responder(responder) => responder(request),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("sent", &self.requests.lock().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request.clone());
        if let Some(hook) = &self.on_send {
            hook(request);
        }
        self.next_response(request)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HttpMethod;

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, url).unwrap()
    }

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let mock = MockTransport::new(vec![HttpResponse::new(200), HttpResponse::new(404)]);
        let r1 = mock.send(&get("https://h.test/1")).await.unwrap();
        let r2 = mock.send(&get("https://h.test/2")).await.unwrap();
        let r3 = mock.send(&get("https://h.test/3")).await.unwrap();
        assert_eq!(r1.status, 200);
        assert_eq!(r2.status, 404);
        assert_eq!(r3.status, 200); // cycles

        let urls: Vec<_> = mock.requests().iter().map(|r| r.url.path().to_string()).collect();
        assert_eq!(urls, vec!["/1", "/2", "/3"]);
    }

    #[tokio::test]
    async fn test_mock_responder_sees_request() {
        let mock = MockTransport::from_fn(|req| {
            Ok(HttpResponse::new(200).with_body(req.url.path().to_string()))
        });
        let resp = mock.send(&get("https://h.test/echo")).await.unwrap();
        assert_eq!(resp.text().as_deref(), Some("/echo"));
    }

    #[tokio::test]
    async fn test_mock_failing() {
        let mock = MockTransport::failing("boom");
        let err = mock.send(&get("https://h.test/")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport(ref m) if m == "boom"));
    }
}
