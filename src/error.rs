use std::time::Duration;
use thiserror::Error;

use crate::message::RequestHistory;

/// Errors produced by the pipeline, its stages and its decoders.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Transport failure reported by a non-`reqwest` transport.
    #[error("Transport failed: {0}")]
    Transport(String),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A response payload could not be decoded (malformed XML, missing
    /// paged map path, unexpected payload shape).
    #[error("Decode failed: {0}")]
    Decode(String),

    /// The service answered with a status code outside the allowed set.
    ///
    /// The `retry_after` field is populated from the `Retry-After` response
    /// header when present.
    #[error("Service returned invalid status code [{status}]")]
    HttpError {
        /// HTTP status code (e.g. 404, 429, 503).
        status: u16,
        /// Response body text, when one was delivered.
        body: Option<String>,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The redirect bound was exhausted. Carries one history entry per
    /// attempt for diagnostics.
    #[error("Too many redirects ({} attempts)", history.len())]
    TooManyRedirects {
        /// Every attempt made before giving up, oldest first.
        history: Vec<RequestHistory>,
    },

    /// The URL of a request or redirect target could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The call was cancelled through its cancellation token.
    #[error("Request was cancelled")]
    Cancelled,

    /// The credential could not produce a usable token.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An error reported by the service.
    ///
    /// `message` holds the decoded error body serialized as JSON, and
    /// `inner` the failure that carried it (usually an
    /// [`PipelineError::HttpError`]). Status lookups and retry decisions
    /// look through `inner`.
    #[error("Service error: {message}")]
    Service {
        /// Decoded service error body, as a JSON string.
        message: String,
        /// The failure the body arrived with.
        #[source]
        inner: Option<Box<PipelineError>>,
    },

    /// A header echoed by the service did not match the value sent.
    #[error("Value for header '{header}' did not match. Expected: {expected} Actual: {actual}")]
    HeaderMismatch {
        header: String,
        expected: String,
        actual: String,
    },

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Whether this error represents a cancellation rather than a failure.
    ///
    /// Callers use this to suppress user-facing error UI.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Whether the failure happened below HTTP (no status code available).
    pub fn is_transport(&self) -> bool {
        matches!(self, PipelineError::Request(_) | PipelineError::Transport(_))
    }

    /// The HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            PipelineError::HttpError { status, .. } => Some(*status),
            PipelineError::Service { inner: Some(inner), .. } => inner.status(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
