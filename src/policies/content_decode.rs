use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::context::{ContextKey, ContextSupporting};
use crate::error::{PipelineError, Result};
use crate::message::{PipelineFailure, PipelineResponse};
use crate::stage::{BoxFut, ErrorOutcome, PipelineStage};
use crate::xml::{self, XmlMap};

fn json_content_type() -> &'static Regex {
    static JSON: OnceLock<Regex> = OnceLock::new();
    JSON.get_or_init(|| {
        Regex::new(r"^(application|text)/([0-9a-z+.]+)?json$").expect("valid content type pattern")
    })
}

/// Decode `body` according to its content type.
///
/// JSON and XML bodies yield a value; anything else yields `None`.
pub fn decode_body(content_type: &str, body: &[u8], map: Option<&XmlMap>) -> Result<Option<Value>> {
    if json_content_type().is_match(content_type) {
        Ok(Some(serde_json::from_slice(body)?))
    } else if content_type.contains("xml") {
        Ok(Some(xml::decode(body, map)?))
    } else {
        Ok(None)
    }
}

fn body_and_type(response: &PipelineResponse) -> Option<(String, bytes::Bytes)> {
    let http = response.http_response.as_ref()?;
    let body = http.body.clone().filter(|b| !b.is_empty())?;
    let content_type = http.content_types().into_iter().next()?;
    Some((content_type, body))
}

/// Turns JSON and XML response bodies into [`ContextKey::DeserializedData`].
///
/// XML is decoded with the map stored under [`ContextKey::XmlMap`], or by
/// inference when there is none. Error bodies are decoded with
/// [`ContextKey::XmlErrorMap`] and wrapped around the failure as a
/// [`PipelineError::Service`]; the failure still propagates. Calls marked
/// [`ContextKey::Stream`] are left alone.
#[derive(Debug, Clone, Default)]
pub struct ContentDecodePolicy;

impl ContentDecodePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for ContentDecodePolicy {
    fn kind(&self) -> &'static str {
        "content-decode"
    }

    fn on_response<'a>(&'a self, response: &'a mut PipelineResponse) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            if response.context.is_stream() {
                return Ok(());
            }
            let Some((content_type, body)) = body_and_type(response) else {
                return Ok(());
            };
            let map = response.context.xml_map(ContextKey::XmlMap).cloned();

            let decoded = response.span.in_scope(|| {
                decode_body(&content_type, &body, map.as_deref()).inspect_err(|e| {
                    tracing::error!(content_type = %content_type, "failed to deserialize response: {e}")
                })
            })?;
            if let Some(value) = decoded {
                response.add_value(ContextKey::DeserializedData, value);
            }
            Ok(())
        })
    }

    fn on_error<'a>(&'a self, failure: PipelineFailure) -> BoxFut<'a, ErrorOutcome> {
        Box::pin(async move {
            let mut failure = failure;
            if failure.response.context.is_stream() {
                return ErrorOutcome::Propagate(failure);
            }
            let Some((content_type, body)) = body_and_type(&failure.response) else {
                return ErrorOutcome::Propagate(failure);
            };
            let map = failure.response.context.xml_map(ContextKey::XmlErrorMap).cloned();

            match decode_body(&content_type, &body, map.as_deref()) {
                Ok(Some(service_error)) => {
                    let original = std::mem::replace(&mut failure.error, PipelineError::Cancelled);
                    failure.error = PipelineError::Service {
                        message: service_error.to_string(),
                        inner: Some(Box::new(original)),
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(parent: &failure.response.span, "error body not decodable: {e}")
                }
            }
            ErrorOutcome::Propagate(failure)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::message::{header, HttpMethod, HttpRequest, HttpResponse, PipelineRequest};
    use crate::pipeline::Pipeline;
    use crate::transport::MockTransport;
    use crate::xml::{ElementToJsonStrategy, XmlMetadata};
    use serde_json::json;
    use std::sync::Arc;

    async fn run(response: HttpResponse, context: PipelineContext) -> crate::stage::StageResult {
        let pipeline = Pipeline::new(
            Arc::new(MockTransport::fixed(response)),
            vec![Arc::new(ContentDecodePolicy::new())],
        );
        let http = HttpRequest::new(HttpMethod::Get, "https://h.test/").unwrap();
        pipeline.run(PipelineRequest::new(http, context)).await
    }

    #[test]
    fn test_json_content_types() {
        for ct in ["application/json", "text/json", "application/merge-patch+json", "application/vnd.api+json"] {
            assert!(json_content_type().is_match(ct), "{ct}");
        }
        for ct in ["application/xml", "text/plain", "application/jsonl"] {
            assert!(!json_content_type().is_match(ct), "{ct}");
        }
    }

    #[tokio::test]
    async fn test_json_body_deserialized() {
        let response = HttpResponse::new(200)
            .with_header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .with_body(r#"{"name":"a"}"#);
        let result = run(response, PipelineContext::new()).await.unwrap();
        assert_eq!(result.context.deserialized_data(), Some(&json!({"name": "a"})));
    }

    #[tokio::test]
    async fn test_xml_body_uses_context_map() {
        let map = XmlMap::from([
            ("Doc", XmlMetadata::new("doc", ElementToJsonStrategy::AnyObject)),
            ("Doc.Name", XmlMetadata::property("name")),
        ]);
        let response = HttpResponse::new(200)
            .with_header(header::CONTENT_TYPE, "application/xml")
            .with_body("<Doc><Name>a</Name><Other>b</Other></Doc>");
        let ctx = PipelineContext::new().add(ContextKey::XmlMap, map);

        let result = run(response, ctx).await.unwrap();
        assert_eq!(result.context.deserialized_data(), Some(&json!({"doc": {"name": "a"}})));
    }

    #[tokio::test]
    async fn test_streaming_call_skipped() {
        let response = HttpResponse::new(200)
            .with_header(header::CONTENT_TYPE, "application/json")
            .with_body("not json");
        let ctx = PipelineContext::new().add(ContextKey::Stream, true);
        let result = run(response, ctx).await.unwrap();
        assert!(result.context.deserialized_data().is_none());
    }

    #[tokio::test]
    async fn test_malformed_xml_fails_with_response() {
        let response = HttpResponse::new(200)
            .with_header(header::CONTENT_TYPE, "application/xml")
            .with_body("<Doc><Name>a</Doc>");
        let failure = run(response, PipelineContext::new()).await.unwrap_err();
        assert!(matches!(failure.error, PipelineError::Decode(_)));
        assert_eq!(failure.response.status(), Some(200));
    }

    #[tokio::test]
    async fn test_error_body_wrapped_as_service_error() {
        let error_map = XmlMap::from([
            ("Error", XmlMetadata::new("Error", ElementToJsonStrategy::Flatten)),
            ("Code", XmlMetadata::property("code")),
            ("Message", XmlMetadata::property("message")),
        ]);
        let response = HttpResponse::new(404)
            .with_header(header::CONTENT_TYPE, "application/xml")
            .with_body("<Error><Code>BlobNotFound</Code><Message>gone</Message></Error>");
        let ctx = PipelineContext::new().add(ContextKey::XmlErrorMap, error_map);

        let failure = run(response, ctx).await.unwrap_err();
        match &failure.error {
            PipelineError::Service { message, inner } => {
                let body: Value = serde_json::from_str(message).unwrap();
                assert_eq!(body, json!({"code": "BlobNotFound", "message": "gone"}));
                assert!(matches!(inner.as_deref(), Some(PipelineError::HttpError { status: 404, .. })));
            }
            other => panic!("expected service error, got {other:?}"),
        }
        assert_eq!(failure.error.status(), Some(404));
    }
}
