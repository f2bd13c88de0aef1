//! HTTP messages and the envelopes that carry them through the stage chain.

use crate::context::{ContextSupporting, PipelineContext};
use crate::error::{PipelineError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Well-known header names.
pub mod header {
    pub const ACCEPT: &str = "Accept";
    pub const ACCEPT_CHARSET: &str = "Accept-Charset";
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const ACCEPT_LANGUAGE: &str = "Accept-Language";
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
    pub const CONTENT_ENCODING: &str = "Content-Encoding";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const DATE: &str = "Date";
    pub const ETAG: &str = "ETag";
    pub const EXPIRES: &str = "Expires";
    pub const IF_MATCH: &str = "If-Match";
    pub const IF_MODIFIED_SINCE: &str = "If-Modified-Since";
    pub const IF_NONE_MATCH: &str = "If-None-Match";
    pub const IF_UNMODIFIED_SINCE: &str = "If-Unmodified-Since";
    pub const LAST_MODIFIED: &str = "Last-Modified";
    pub const LOCATION: &str = "Location";
    pub const PRAGMA: &str = "Pragma";
    pub const RETRY_AFTER: &str = "Retry-After";
    pub const SERVER: &str = "Server";
    pub const TRACEPARENT: &str = "traceparent";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
    pub const USER_AGENT: &str = "User-Agent";
    pub const CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
    pub const RETURN_CLIENT_REQUEST_ID: &str = "x-ms-return-client-request-id";
    pub const REQUEST_ID: &str = "x-ms-request-id";
    pub const DATE_MS: &str = "x-ms-date";
    pub const VERSION: &str = "x-ms-version";
}

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Merge,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Merge => "MERGE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "MERGE" => Ok(HttpMethod::Merge),
            "OPTIONS" => Ok(HttpMethod::Options),
            "TRACE" => Ok(HttpMethod::Trace),
            other => Err(PipelineError::Other(format!("Unknown HTTP method: {other}"))),
        }
    }
}

/// Header map.
///
/// Keys are stored exactly as given. `get` and `remove` try an exact match
/// first and fall back to an ASCII case-insensitive one, since transports
/// commonly hand back lower-cased names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders(BTreeMap<String, String>);

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, returning the previous value stored under the exact name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.0.get(name) {
            return Some(value);
        }
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        if let Some(value) = self.0.remove(name) {
            return Some(value);
        }
        let key = self.0.keys().find(|k| k.eq_ignore_ascii_case(name))?.clone();
        self.0.remove(&key)
    }

    /// Copy every header from `other`, replacing entries whose names match
    /// in any letter case.
    pub fn extend(&mut self, other: &HttpHeaders) {
        for (k, v) in other.iter() {
            self.0.retain(|existing, _| !existing.eq_ignore_ascii_case(k));
            self.0.insert(k.to_string(), v.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for HttpHeaders {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// An outgoing HTTP request. Owned by the in-flight call until it completes.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HttpHeaders,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Parse `url` and build a request with no headers or body.
    pub fn new(method: HttpMethod, url: &str) -> Result<Self> {
        Ok(Self::from_url(method, Url::parse(url)?))
    }

    pub fn from_url(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HttpHeaders::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HttpHeaders) -> Self {
        self.headers.extend(&headers);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append query parameters, skipping any that are already present.
    pub fn format_query<K, V>(&mut self, params: &[(K, V)])
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let existing: Vec<String> = self.url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let fresh: Vec<_> = params
            .iter()
            .filter(|(k, _)| !existing.iter().any(|e| e == k.as_ref()))
            .collect();
        if fresh.is_empty() {
            return;
        }
        let mut pairs = self.url.query_pairs_mut();
        for (k, v) in fresh {
            pairs.append_pair(k.as_ref(), v.as_ref());
        }
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// A response produced by the transport. Immutable once produced.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Option<Bytes>,
    /// The request that produced this response.
    pub request: Option<HttpRequest>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HttpHeaders::new(),
            body: None,
            request: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Canonical reason phrase for the status code.
    pub fn status_message(&self) -> &'static str {
        http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
    }

    /// `Retry-After` read as whole seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// The error reported when this response's status is not allowed.
    pub fn status_error(&self) -> PipelineError {
        PipelineError::HttpError {
            status: self.status,
            body: self.text(),
            retry_after: self.retry_after(),
        }
    }

    /// `Content-Type` split on `;` with parameters dropped, lower-cased.
    pub fn content_types(&self) -> Vec<String> {
        self.headers
            .get(header::CONTENT_TYPE)
            .map(|ct| {
                ct.split(';')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty() && !s.contains('='))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A request on its way down the stage chain.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub http_request: HttpRequest,
    pub context: PipelineContext,
    /// Span every stage logs under. Defaults to the current span.
    pub span: tracing::Span,
}

impl PipelineRequest {
    pub fn new(http_request: HttpRequest, context: PipelineContext) -> Self {
        Self {
            http_request,
            context,
            span: tracing::Span::current(),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

impl ContextSupporting for PipelineRequest {
    fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.context
    }
}

/// A response on its way back up the stage chain.
///
/// `http_response` is `None` when the failure happened before the
/// transport produced anything.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
    pub http_request: HttpRequest,
    pub http_response: Option<HttpResponse>,
    pub context: PipelineContext,
    pub span: tracing::Span,
}

impl PipelineResponse {
    pub fn new(request: &PipelineRequest, http_response: Option<HttpResponse>) -> Self {
        Self {
            http_request: request.http_request.clone(),
            http_response,
            context: request.context.clone(),
            span: request.span.clone(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.http_response.as_ref().map(|r| r.status)
    }
}

impl ContextSupporting for PipelineResponse {
    fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.context
    }
}

/// An error paired with whatever response was available when it happened.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub response: PipelineResponse,
}

impl PipelineFailure {
    pub fn new(error: PipelineError, response: PipelineResponse) -> Self {
        Self { error, response }
    }

    /// Drop the envelope, keeping the error.
    pub fn into_error(self) -> PipelineError {
        self.error
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.response.http_request.method, self.response.http_request.url, self.error
        )
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// One redirect hop, recorded for diagnostics.
#[derive(Debug, Clone)]
pub struct RequestHistory {
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub context: PipelineContext,
    /// Rendered error of the hop, when it failed.
    pub error: Option<String>,
}

impl RequestHistory {
    pub fn new(
        request: HttpRequest,
        response: Option<HttpResponse>,
        context: PipelineContext,
        error: Option<&PipelineError>,
    ) -> Self {
        Self {
            request,
            response,
            context,
            error: error.map(|e| e.to_string()),
        }
    }
}
