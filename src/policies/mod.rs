//! Stock pipeline stages.
//!
//! A generated client typically chains them as:
//!
//! ```text
//! HeadersPolicy ─► UserAgentPolicy ─► BearerTokenCredentialPolicy ─► RetryPolicy
//!   ─► RedirectPolicy ─► ContentDecodePolicy ─► LoggingPolicy ─► transport
//! ```
//!
//! Logging sits last so it observes every header the earlier stages
//! inject; decoding sits under retry so error bodies are decoded once per
//! attempt.

pub mod authentication;
pub mod content_decode;
pub mod headers;
pub mod headers_validation;
pub mod logging;
pub mod redirect;
pub mod retry;
pub mod user_agent;

pub use authentication::{
    AccessToken, AnonymousAccessPolicy, BearerTokenCredentialPolicy, TokenCredential,
};
pub use content_decode::{decode_body, ContentDecodePolicy};
pub use headers::HeadersPolicy;
pub use headers_validation::HeadersValidationPolicy;
pub use logging::{body_summary, curl_command, CurlFormattedRequestLoggingPolicy, LoggingPolicy};
pub use redirect::RedirectPolicy;
pub use retry::RetryPolicy;
pub use user_agent::{AgentInfo, UserAgentPolicy};
