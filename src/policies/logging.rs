//! Request/response logging through `tracing`.
//!
//! [`LoggingPolicy`] writes one block per request and one per response at
//! `INFO`, with redacted headers and a body summary at `DEBUG`:
//!
//! ```text
//! --> [<client request id>]
//! GET https://host/path?comp=list&sig=REDACTED
//! --> [END <client request id>]
//! <-- [<client request id>] (12.34ms)
//! 200 OK
//! <-- [END <client request id>]
//! ```
//!
//! Header values and query parameters not on the allow-lists are replaced
//! with `REDACTED`. [`CurlFormattedRequestLoggingPolicy`] additionally
//! renders each request as a `curl` command at `DEBUG`.

use std::collections::HashSet;
use std::time::Instant;

use tracing::Level;
use url::Url;

use crate::context::{ContextKey, ContextSupporting};
use crate::error::{PipelineError, Result};
use crate::message::{header, HttpHeaders, PipelineFailure, PipelineRequest, PipelineResponse};
use crate::options::LoggingOptions;
use crate::stage::{BoxFut, ErrorOutcome, PipelineStage};

const MAX_BODY_LOG_SIZE: usize = 16 * 1024;
const REDACTED: &str = "REDACTED";

/// Logs every request and response that passes through it.
#[derive(Debug, Clone)]
pub struct LoggingPolicy {
    allowed_headers: HashSet<String>,
    allowed_query_params: HashSet<String>,
}

impl Default for LoggingPolicy {
    fn default() -> Self {
        Self::new(&LoggingOptions::default())
    }
}

impl LoggingPolicy {
    pub fn new(options: &LoggingOptions) -> Self {
        Self {
            allowed_headers: options
                .allowed_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            allowed_query_params: options
                .allowed_query_params
                .iter()
                .map(|q| q.to_ascii_lowercase())
                .collect(),
        }
    }

    /// `url` with every disallowed query value replaced.
    pub fn redact_url(&self, url: &Url) -> String {
        if url.query().is_none() {
            return url.to_string();
        }
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let value = if self.allowed_query_params.contains(&k.to_ascii_lowercase()) {
                    v.into_owned()
                } else {
                    REDACTED.to_string()
                };
                (k.into_owned(), value)
            })
            .collect();
        let mut redacted = url.clone();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
        redacted.to_string()
    }

    /// `headers` with every disallowed value replaced.
    pub fn redact_headers(&self, headers: &HttpHeaders) -> HttpHeaders {
        headers
            .iter()
            .map(|(name, value)| {
                if self.allowed_headers.contains(&name.to_ascii_lowercase()) {
                    (name, value)
                } else {
                    (name, REDACTED)
                }
            })
            .collect()
    }

    fn log_request(&self, request: &PipelineRequest) {
        let span = &request.span;
        let req = &request.http_request;
        let request_id = req.headers.get(header::CLIENT_REQUEST_ID).unwrap_or("(none)");

        tracing::info!(parent: span, "--> [{request_id}]");
        tracing::info!(parent: span, "{} {}", req.method, self.redact_url(&req.url));
        if tracing::enabled!(Level::DEBUG) {
            self.log_details(span, &req.headers, req.body.as_deref());
        }
        tracing::info!(parent: span, "--> [END {request_id}]");
    }

    fn log_response(&self, response: &PipelineResponse, error: Option<&PipelineError>) {
        let span = &response.span;
        let request_id = response
            .http_request
            .headers
            .get(header::CLIENT_REQUEST_ID)
            .unwrap_or("(none)");

        let started = response
            .value(ContextKey::RequestStartTime)
            .and_then(|v| v.as_instant());
        match started {
            Some(started) => {
                let ms = started.elapsed().as_secs_f64() * 1000.0;
                tracing::info!(parent: span, "<-- [{request_id}] ({ms:.2}ms)");
            }
            None => tracing::info!(parent: span, "<-- [{request_id}]"),
        }

        if let Some(error) = error {
            tracing::warn!(parent: span, "{error}");
        }

        if let Some(res) = &response.http_response {
            if res.status >= 400 {
                tracing::warn!(parent: span, "{} {}", res.status, res.status_message());
            } else {
                tracing::info!(parent: span, "{} {}", res.status, res.status_message());
            }
            if tracing::enabled!(Level::DEBUG) {
                self.log_details(span, &res.headers, res.body.as_deref());
            }
        }

        tracing::info!(parent: span, "<-- [END {request_id}]");
    }

    fn log_details(&self, span: &tracing::Span, headers: &HttpHeaders, body: Option<&[u8]>) {
        for (name, value) in self.redact_headers(headers).iter() {
            tracing::debug!(parent: span, "{name}: {value}");
        }
        tracing::debug!(parent: span, "{}", body_summary(headers, body));
    }
}

/// What to print for a body, given its headers.
pub fn body_summary(headers: &HttpHeaders, body: Option<&[u8]>) -> String {
    if let Some(encoding) = headers.get(header::CONTENT_ENCODING) {
        if !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity") {
            return "(encoded body omitted)".into();
        }
    }
    if let Some(disposition) = headers.get(header::CONTENT_DISPOSITION) {
        if !disposition.is_empty() && !disposition.eq_ignore_ascii_case("inline") {
            return "(non-inline body omitted)".into();
        }
    }
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.ends_with("octet-stream") || content_type.starts_with("image") {
            return "(binary body omitted)".into();
        }
    }

    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|l| l.trim().parse::<usize>().ok())
        .or_else(|| body.map(<[u8]>::len))
        .unwrap_or(0);
    if length > MAX_BODY_LOG_SIZE {
        return format!("({length}-byte body omitted)");
    }
    match body {
        Some(bytes) if length > 0 && !bytes.is_empty() => String::from_utf8_lossy(bytes).into_owned(),
        _ => "(empty body)".into(),
    }
}

impl PipelineStage for LoggingPolicy {
    fn kind(&self) -> &'static str {
        "logging"
    }

    fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            request.add_value(ContextKey::RequestStartTime, Instant::now());
            let allowed: Vec<String> = self.allowed_headers.iter().cloned().collect();
            request.add_value(ContextKey::AllowedHeaders, allowed);
            self.log_request(request);
            Ok(())
        })
    }

    fn on_response<'a>(&'a self, response: &'a mut PipelineResponse) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            self.log_response(response, None);
            Ok(())
        })
    }

    fn on_error<'a>(&'a self, failure: PipelineFailure) -> BoxFut<'a, ErrorOutcome> {
        Box::pin(async move {
            self.log_response(&failure.response, Some(&failure.error));
            ErrorOutcome::Propagate(failure)
        })
    }
}

/// Logs each request as a copy-pasteable `curl` command at `DEBUG`.
#[derive(Debug, Clone, Default)]
pub struct CurlFormattedRequestLoggingPolicy;

impl CurlFormattedRequestLoggingPolicy {
    pub fn new() -> Self {
        Self
    }
}

/// Render `request` as a `curl` command line.
pub fn curl_command(request: &crate::message::HttpRequest) -> String {
    let mut parts = vec!["curl".to_string(), "-X".into(), request.method.to_string()];
    let mut compressed = false;

    for (name, value) in request.headers.iter() {
        let escaped = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            let inner = value.trim_matches('"').replace('\\', "\\\\");
            format!("\\\"{inner}\\\"")
        } else {
            value.replace('\\', "\\\\")
        };
        if name.eq_ignore_ascii_case(header::ACCEPT_ENCODING) && !value.eq_ignore_ascii_case("identity")
        {
            compressed = true;
        }
        parts.push("-H".into());
        parts.push(format!("\"{name}: {escaped}\""));
    }

    if let Some(body) = request.text() {
        let body = body.replace('\n', "\\n").replace('\'', "\\'");
        parts.push("--data".into());
        parts.push(format!("$'{body}'"));
    }
    if compressed {
        parts.push("--compressed".into());
    }
    parts.push(request.url.to_string());
    parts.join(" ")
}

impl PipelineStage for CurlFormattedRequestLoggingPolicy {
    fn kind(&self) -> &'static str {
        "curl-logging"
    }

    fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            if tracing::enabled!(Level::DEBUG) {
                let span = &request.span;
                let url = &request.http_request.url;
                tracing::debug!(parent: span, "╭--- cURL ({url})");
                tracing::debug!(parent: span, "{}", curl_command(&request.http_request));
                tracing::debug!(parent: span, "╰--- (copy and paste the above line to a terminal)");
            }
            Ok(())
        })
    }
}
