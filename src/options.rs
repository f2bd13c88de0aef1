//! Client configuration.
//!
//! Every options type has a `Default` and `with_*` setters, so a client can
//! be configured with only the knobs it cares about:
//!
//! ```
//! use sdk_pipeline::options::{ClientOptions, TelemetryOptions};
//! use sdk_pipeline::BackoffConfig;
//! use std::time::Duration;
//!
//! let options = ClientOptions::default()
//!     .with_timeout(Duration::from_secs(30))
//!     .with_telemetry(TelemetryOptions::default().with_application_id("my app"))
//!     .with_retry(BackoffConfig::standard());
//! assert_eq!(options.transport.timeout, Some(Duration::from_secs(30)));
//! ```

use crate::backoff::BackoffConfig;
use crate::events::EventHandler;
use crate::message::header;
use crate::stage::PipelineStage;
use std::sync::Arc;
use std::time::Duration;

/// Options for the underlying transport.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Whole-call timeout. Also the default timeout of cancellation tokens
    /// attached to calls. Default: none.
    pub timeout: Option<Duration>,
}

/// Options for the `User-Agent` telemetry string.
#[derive(Debug, Clone, Default)]
pub struct TelemetryOptions {
    /// Omit platform information from the user agent. Default: `false`.
    pub disabled: bool,
    /// Application id prefixed to the user agent.
    pub application_id: Option<String>,
}

impl TelemetryOptions {
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = Some(id.into());
        self
    }
}

/// Header names the logging stage prints unredacted by default.
pub const DEFAULT_ALLOWED_LOG_HEADERS: &[&str] = &[
    header::ACCEPT,
    header::CACHE_CONTROL,
    header::CLIENT_REQUEST_ID,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::DATE,
    header::ETAG,
    header::EXPIRES,
    header::IF_MATCH,
    header::IF_MODIFIED_SINCE,
    header::IF_NONE_MATCH,
    header::IF_UNMODIFIED_SINCE,
    header::LAST_MODIFIED,
    header::PRAGMA,
    header::REQUEST_ID,
    header::RETRY_AFTER,
    header::RETURN_CLIENT_REQUEST_ID,
    header::SERVER,
    header::TRACEPARENT,
    header::TRANSFER_ENCODING,
    header::USER_AGENT,
];

/// Allow-lists for the logging stage. Everything else is redacted.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub allowed_headers: Vec<String>,
    pub allowed_query_params: Vec<String>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            allowed_headers: DEFAULT_ALLOWED_LOG_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            allowed_query_params: Vec::new(),
        }
    }
}

impl LoggingOptions {
    pub fn with_allowed_header(mut self, name: impl Into<String>) -> Self {
        self.allowed_headers.push(name.into());
        self
    }

    pub fn with_allowed_query_param(mut self, name: impl Into<String>) -> Self {
        self.allowed_query_params.push(name.into());
        self
    }
}

/// Options for the redirect stage.
#[derive(Debug, Clone)]
pub struct RedirectOptions {
    /// Redirects followed before the call fails. Default: 30.
    pub max_redirects: u32,
    /// Status codes treated as redirects. Default: 300-303, 307, 308.
    pub redirect_codes: Vec<u16>,
    /// Headers stripped from the follow-up request. Default: `Authorization`.
    pub removed_headers: Vec<String>,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            max_redirects: 30,
            redirect_codes: vec![300, 301, 302, 303, 307, 308],
            removed_headers: vec![header::AUTHORIZATION.to_string()],
        }
    }
}

impl RedirectOptions {
    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_redirect_codes(mut self, codes: Vec<u16>) -> Self {
        self.redirect_codes = codes;
        self
    }

    pub fn with_removed_headers(mut self, headers: Vec<String>) -> Self {
        self.removed_headers = headers;
        self
    }
}

/// Top-level options for a [`PipelineClient`](crate::client::PipelineClient).
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Service API version, if the client sends one.
    pub api_version: Option<String>,
    pub transport: TransportOptions,
    pub telemetry: TelemetryOptions,
    pub logging: LoggingOptions,
    pub retry: BackoffConfig,
    pub redirect: RedirectOptions,
    /// User policies run once per call, before the retry stage.
    pub per_request_policies: Vec<Arc<dyn PipelineStage>>,
    /// User policies run on every attempt, after the SDK's own.
    pub per_retry_policies: Vec<Arc<dyn PipelineStage>>,
    /// Optional lifecycle observer.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ClientOptions {
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Shorthand for a transport timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport.timeout = Some(timeout);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryOptions) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_logging(mut self, logging: LoggingOptions) -> Self {
        self.logging = logging;
        self
    }

    pub fn with_retry(mut self, retry: BackoffConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_redirect(mut self, redirect: RedirectOptions) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_per_request_policy(mut self, policy: Arc<dyn PipelineStage>) -> Self {
        self.per_request_policies.push(policy);
        self
    }

    pub fn with_per_retry_policy(mut self, policy: Arc<dyn PipelineStage>) -> Self {
        self.per_retry_policies.push(policy);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = |v: &[Arc<dyn PipelineStage>]| v.iter().map(|p| p.kind()).collect::<Vec<_>>();
        f.debug_struct("ClientOptions")
            .field("api_version", &self.api_version)
            .field("transport", &self.transport)
            .field("telemetry", &self.telemetry)
            .field("logging", &self.logging)
            .field("retry", &self.retry)
            .field("redirect", &self.redirect)
            .field("per_request_policies", &kinds(&self.per_request_policies))
            .field("per_retry_policies", &kinds(&self.per_retry_policies))
            .field("event_handler", &self.event_handler.is_some())
            .finish()
    }
}
