//! Immutable, parent-linked key/value context threaded through the pipeline.
//!
//! [`PipelineContext`] is a persistent singly linked list. Adding a value
//! never touches an existing node: it allocates a new head pointing at the
//! old one, so contexts derived from the same parent share their older
//! nodes and can be handed to concurrent requests without locking.
//!
//! Lookups walk from the head toward the root and return the first match,
//! so later writes shadow earlier ones with the same key.
//!
//! ```
//! use sdk_pipeline::context::{ContextKey, PipelineContext};
//!
//! let base = PipelineContext::new().add("k", "v1");
//! let shadowed = base.add("k", "v2");
//!
//! assert_eq!(shadowed.value("k").and_then(|v| v.as_str()), Some("v2"));
//! assert_eq!(base.value("k").and_then(|v| v.as_str()), Some("v1"));
//! assert!(base.value(ContextKey::XmlMap).is_none());
//! ```

use crate::cancellation::CancellationToken;
use crate::message::HttpHeaders;
use crate::options::ClientOptions;
use crate::xml::XmlMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Keys understood by the stock stages, plus free-form keys for callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// Status codes the call accepts as success. Default: `[200]`.
    AllowedStatusCodes,
    /// Header names the logging stage may print unredacted.
    AllowedHeaders,
    /// The call's [`CancellationToken`].
    CancellationToken,
    /// Payload produced by the decode stage.
    DeserializedData,
    /// When the logging stage saw the request leave.
    RequestStartTime,
    /// Map used to decode an XML success body.
    XmlMap,
    /// Map used to decode an XML error body.
    XmlErrorMap,
    /// Marks a streaming call; decode stages leave the body alone.
    Stream,
    /// Extra headers merged into the request by the headers stage.
    Headers,
    /// Any other key.
    Custom(String),
}

impl ContextKey {
    /// The string form of the key.
    pub fn as_str(&self) -> &str {
        match self {
            ContextKey::AllowedStatusCodes => "allowedStatusCodes",
            ContextKey::AllowedHeaders => "allowedHeaders",
            ContextKey::CancellationToken => "cancellationToken",
            ContextKey::DeserializedData => "deserializedData",
            ContextKey::RequestStartTime => "requestStartTime",
            ContextKey::XmlMap => "xmlMap",
            ContextKey::XmlErrorMap => "xmlErrorMap",
            ContextKey::Stream => "stream",
            ContextKey::Headers => "headers",
            ContextKey::Custom(key) => key,
        }
    }
}

impl From<&str> for ContextKey {
    fn from(key: &str) -> Self {
        match key {
            "allowedStatusCodes" => ContextKey::AllowedStatusCodes,
            "allowedHeaders" => ContextKey::AllowedHeaders,
            "cancellationToken" => ContextKey::CancellationToken,
            "deserializedData" => ContextKey::DeserializedData,
            "requestStartTime" => ContextKey::RequestStartTime,
            "xmlMap" => ContextKey::XmlMap,
            "xmlErrorMap" => ContextKey::XmlErrorMap,
            "stream" => ContextKey::Stream,
            "headers" => ContextKey::Headers,
            other => ContextKey::Custom(other.to_string()),
        }
    }
}

impl From<String> for ContextKey {
    fn from(key: String) -> Self {
        ContextKey::from(key.as_str())
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of value kinds a context can carry.
///
/// Lookups go through the typed `as_*` accessors, which return `None` when
/// the stored kind is not the one asked for.
#[derive(Debug, Clone)]
pub enum ContextValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Strings(Vec<String>),
    StatusCodes(Vec<u16>),
    Headers(HttpHeaders),
    Json(Value),
    Instant(Instant),
    XmlMap(Arc<XmlMap>),
    CancellationToken(CancellationToken),
}

impl ContextValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ContextValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            ContextValue::Strings(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_status_codes(&self) -> Option<&[u16]> {
        match self {
            ContextValue::StatusCodes(codes) => Some(codes),
            _ => None,
        }
    }

    pub fn as_headers(&self) -> Option<&HttpHeaders> {
        match self {
            ContextValue::Headers(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ContextValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<Instant> {
        match self {
            ContextValue::Instant(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_xml_map(&self) -> Option<&Arc<XmlMap>> {
        match self {
            ContextValue::XmlMap(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_cancellation_token(&self) -> Option<&CancellationToken> {
        match self {
            ContextValue::CancellationToken(token) => Some(token),
            _ => None,
        }
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        ContextValue::Bool(v)
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        ContextValue::Int(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        ContextValue::Str(v.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        ContextValue::Str(v)
    }
}

impl From<Vec<String>> for ContextValue {
    fn from(v: Vec<String>) -> Self {
        ContextValue::Strings(v)
    }
}

impl From<Vec<u16>> for ContextValue {
    fn from(v: Vec<u16>) -> Self {
        ContextValue::StatusCodes(v)
    }
}

impl From<HttpHeaders> for ContextValue {
    fn from(v: HttpHeaders) -> Self {
        ContextValue::Headers(v)
    }
}

impl From<Value> for ContextValue {
    fn from(v: Value) -> Self {
        ContextValue::Json(v)
    }
}

impl From<Instant> for ContextValue {
    fn from(v: Instant) -> Self {
        ContextValue::Instant(v)
    }
}

impl From<XmlMap> for ContextValue {
    fn from(v: XmlMap) -> Self {
        ContextValue::XmlMap(Arc::new(v))
    }
}

impl From<Arc<XmlMap>> for ContextValue {
    fn from(v: Arc<XmlMap>) -> Self {
        ContextValue::XmlMap(v)
    }
}

impl From<CancellationToken> for ContextValue {
    fn from(v: CancellationToken) -> Self {
        ContextValue::CancellationToken(v)
    }
}

struct ContextNode {
    key: ContextKey,
    value: ContextValue,
    parent: Option<Arc<ContextNode>>,
}

// Unlink the chain iteratively so long contexts do not overflow the stack.
// Stops at the first ancestor another context still holds.
impl Drop for ContextNode {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(node) = parent {
            match Arc::try_unwrap(node) {
                Ok(mut node) => parent = node.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Per-call, immutable key/value store. Cloning is cheap (one `Arc`).
#[derive(Clone, Default)]
pub struct PipelineContext {
    head: Option<Arc<ContextNode>>,
}

impl PipelineContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from key/value pairs, added in iteration order.
    pub fn of<K, V, I>(pairs: I) -> Self
    where
        K: Into<ContextKey>,
        V: Into<ContextValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |ctx, (k, v)| ctx.add(k, v))
    }

    /// Return a new context whose head wraps `(key, value)`.
    ///
    /// The receiver is never modified.
    #[must_use]
    pub fn add(&self, key: impl Into<ContextKey>, value: impl Into<ContextValue>) -> Self {
        Self {
            head: Some(Arc::new(ContextNode {
                key: key.into(),
                value: value.into(),
                parent: self.head.clone(),
            })),
        }
    }

    /// The most recently added value for `key`, if any.
    pub fn value(&self, key: impl Into<ContextKey>) -> Option<&ContextValue> {
        let key = key.into();
        self.iter().find(|(k, _)| **k == key).map(|(_, v)| v)
    }

    /// Number of entries, shadowed ones included.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Entries from the most recent to the oldest.
    pub fn iter(&self) -> ContextIter<'_> {
        ContextIter {
            current: self.head.as_deref(),
        }
    }

    /// Flatten into a map; shadowed entries are dropped.
    pub fn to_map(&self) -> HashMap<ContextKey, ContextValue> {
        let mut map = HashMap::new();
        for (key, value) in self.iter() {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }

    /// Layer every entry of `other` on top of this context.
    ///
    /// `other`'s entries keep their relative order, so its most recent value
    /// for a key ends up shadowing everything else.
    #[must_use]
    pub fn merge(&self, other: &PipelineContext) -> Self {
        let mut entries: Vec<_> = other.iter().collect();
        entries.reverse();
        entries
            .into_iter()
            .fold(self.clone(), |ctx, (k, v)| ctx.add(k.clone(), v.clone()))
    }

    /// Whether two handles point at the same head node.
    pub fn ptr_eq(&self, other: &PipelineContext) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Attach a cancellation token, applying the client's default timeout.
    ///
    /// When the call supplies a token without a timeout, the client's
    /// transport timeout is applied to it. When the call supplies no token
    /// but the client has a timeout, a timeout-only token is created.
    #[must_use]
    pub fn with_cancellation(
        &self,
        token: Option<CancellationToken>,
        options: &ClientOptions,
    ) -> Self {
        let default_timeout = options.transport.timeout;
        match (token, default_timeout) {
            (Some(token), timeout) => {
                if let Some(timeout) = timeout {
                    token.set_default_timeout(timeout);
                }
                self.add(ContextKey::CancellationToken, token)
            }
            (None, Some(timeout)) => self.add(
                ContextKey::CancellationToken,
                CancellationToken::with_timeout(timeout),
            ),
            (None, None) => self.clone(),
        }
    }

    pub fn allowed_status_codes(&self) -> Option<&[u16]> {
        self.value(ContextKey::AllowedStatusCodes)
            .and_then(ContextValue::as_status_codes)
    }

    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.value(ContextKey::CancellationToken)
            .and_then(ContextValue::as_cancellation_token)
    }

    pub fn deserialized_data(&self) -> Option<&Value> {
        self.value(ContextKey::DeserializedData)
            .and_then(ContextValue::as_json)
    }

    pub fn xml_map(&self, key: ContextKey) -> Option<&Arc<XmlMap>> {
        self.value(key).and_then(ContextValue::as_xml_map)
    }

    pub fn is_stream(&self) -> bool {
        self.value(ContextKey::Stream)
            .and_then(ContextValue::as_bool)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(k, _)| k.as_str()))
            .finish()
    }
}

/// Iterator over a context's entries, newest first.
pub struct ContextIter<'a> {
    current: Option<&'a ContextNode>,
}

impl<'a> Iterator for ContextIter<'a> {
    type Item = (&'a ContextKey, &'a ContextValue);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = node.parent.as_deref();
        Some((&node.key, &node.value))
    }
}

/// Envelopes that carry a [`PipelineContext`].
///
/// `add_value` swaps the envelope's context for a new head; nodes already
/// shared with other envelopes are left as they were.
pub trait ContextSupporting {
    fn context(&self) -> &PipelineContext;

    fn context_mut(&mut self) -> &mut PipelineContext;

    fn add_value(&mut self, key: impl Into<ContextKey>, value: impl Into<ContextValue>) {
        let next = self.context().add(key, value);
        *self.context_mut() = next;
    }

    fn value(&self, key: impl Into<ContextKey>) -> Option<&ContextValue> {
        self.context().value(key)
    }
}
