//! Bounded redirect following with per-hop history.
//!
//! The stage issues one downstream attempt at a time. After each attempt it
//! either follows the redirect (another loop iteration) or resolves the call
//! with whatever the attempt produced. Once the budget is spent, the next
//! redirect fails the call with [`PipelineError::TooManyRedirects`], which
//! carries one [`RequestHistory`] entry per attempt.

use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::message::{
    header, HttpMethod, HttpRequest, PipelineFailure, PipelineRequest, PipelineResponse,
    RequestHistory,
};
use crate::options::RedirectOptions;
use crate::stage::{BoxFut, Next, PipelineStage, StageResult};
use url::Url;

/// Follows 3xx responses up to a configured bound.
///
/// - 301 and 302 are only followed for `GET` and `HEAD`.
/// - 303 turns the follow-up into a body-less `GET`.
/// - 307 and 308 repeat the original method and body.
/// - The configured headers (`Authorization` by default) are stripped from
///   every follow-up request.
#[derive(Clone, Default)]
pub struct RedirectPolicy {
    options: RedirectOptions,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl RedirectPolicy {
    pub fn new(options: RedirectOptions) -> Self {
        Self {
            options,
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Where `response` redirects to, if it is a redirect this stage follows.
    fn redirect_target(&self, response: &PipelineResponse) -> Result<Option<Url>> {
        let Some(http_response) = &response.http_response else {
            return Ok(None);
        };
        let status = http_response.status;
        if !self.options.redirect_codes.contains(&status) {
            return Ok(None);
        }
        let method = response.http_request.method;
        if matches!(status, 301 | 302) && !matches!(method, HttpMethod::Get | HttpMethod::Head) {
            return Ok(None);
        }

        // Location may be any relative reference. Retry-After is only a
        // fallback target when it holds a URL or a rooted path, not seconds.
        let location = http_response.headers.get(header::LOCATION).or_else(|| {
            http_response
                .headers
                .get(header::RETRY_AFTER)
                .filter(|l| Url::parse(l).is_ok() || l.starts_with('/'))
        });
        match location {
            Some(location) => Ok(Some(response.http_request.url.join(location)?)),
            None => Ok(None),
        }
    }

    fn follow_up(&self, original: &PipelineRequest, status: u16, target: Url) -> PipelineRequest {
        let mut http = HttpRequest {
            url: target,
            ..original.http_request.clone()
        };
        if status == 303 {
            http.method = HttpMethod::Get;
            http.body = None;
            http.headers.remove(header::CONTENT_TYPE);
            http.headers.remove(header::CONTENT_LENGTH);
        }
        for name in &self.options.removed_headers {
            http.headers.remove(name);
        }
        PipelineRequest {
            http_request: http,
            context: original.context.clone(),
            span: original.span.clone(),
        }
    }
}

impl std::fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectPolicy")
            .field("options", &self.options)
            .finish()
    }
}

fn resolve(response: PipelineResponse, error: Option<PipelineError>) -> StageResult {
    match error {
        None => Ok(response),
        Some(error) => Err(PipelineFailure::new(error, response)),
    }
}

impl PipelineStage for RedirectPolicy {
    fn kind(&self) -> &'static str {
        "redirect"
    }

    fn process<'a>(&'a self, request: PipelineRequest, next: Next<'a>) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let mut request = request;
            let mut remaining = self.options.max_redirects;
            let mut history = Vec::new();

            loop {
                let (response, error) = match next.run(request.clone()).await {
                    Ok(response) => (response, None),
                    Err(failure) => (failure.response, Some(failure.error)),
                };

                let target = match self.redirect_target(&response) {
                    Ok(Some(target)) => target,
                    Ok(None) => return resolve(response, error),
                    Err(e) => return Err(PipelineFailure::new(e, response)),
                };
                let status = response.status().unwrap_or_default();

                history.push(RequestHistory::new(
                    response.http_request.clone(),
                    response.http_response.clone(),
                    response.context.clone(),
                    error.as_ref(),
                ));

                if remaining == 0 {
                    tracing::warn!(
                        parent: &request.span,
                        attempts = history.len(),
                        "too many redirects"
                    );
                    return Err(PipelineFailure::new(
                        PipelineError::TooManyRedirects { history },
                        response,
                    ));
                }
                remaining -= 1;

                tracing::debug!(
                    parent: &request.span,
                    status,
                    from = %response.http_request.url,
                    to = %target,
                    "following redirect"
                );
                emit(
                    &self.event_handler,
                    Event::Redirect {
                        status,
                        from: response.http_request.url.to_string(),
                        to: target.to_string(),
                        remaining,
                    },
                );
                request = self.follow_up(&request, status, target);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::message::HttpResponse;
    use crate::pipeline::Pipeline;
    use crate::transport::MockTransport;

    fn pipeline(mock: &Arc<MockTransport>, options: RedirectOptions) -> Pipeline {
        Pipeline::new(mock.clone(), vec![Arc::new(RedirectPolicy::new(options))])
    }

    fn request(method: HttpMethod, url: &str) -> PipelineRequest {
        let http = HttpRequest::new(method, url)
            .unwrap()
            .with_header(header::AUTHORIZATION, "Bearer secret")
            .with_body("payload");
        PipelineRequest::new(http, PipelineContext::new())
    }

    #[tokio::test]
    async fn test_redirect_bound_records_every_attempt() {
        let mock = Arc::new(MockTransport::fixed(
            HttpResponse::new(302).with_header(header::LOCATION, "/again"),
        ));
        let pipeline = pipeline(&mock, RedirectOptions::default().with_max_redirects(2));

        let failure = pipeline
            .run(request(HttpMethod::Get, "https://h.test/start"))
            .await
            .unwrap_err();
        match failure.error {
            PipelineError::TooManyRedirects { history } => {
                assert_eq!(history.len(), 3);
                assert_eq!(history[0].request.url.path(), "/start");
                assert_eq!(history[1].request.url.path(), "/again");
                assert!(history.iter().all(|h| h.error.is_some()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_303_turns_post_into_get() {
        let mock = Arc::new(MockTransport::new(vec![
            HttpResponse::new(303).with_header(header::LOCATION, "https://other.test/result"),
            HttpResponse::new(200),
        ]));
        let pipeline = pipeline(&mock, RedirectOptions::default());

        let response = pipeline
            .run(request(HttpMethod::Post, "https://h.test/submit"))
            .await
            .unwrap();
        assert_eq!(response.status(), Some(200));

        let sent = mock.requests();
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(sent[1].method, HttpMethod::Get);
        assert!(sent[1].body.is_none());
        assert_eq!(sent[1].url.as_str(), "https://other.test/result");
    }

    #[tokio::test]
    async fn test_307_keeps_post_and_body() {
        let mock = Arc::new(MockTransport::new(vec![
            HttpResponse::new(307).with_header(header::LOCATION, "/moved"),
            HttpResponse::new(200),
        ]));
        let pipeline = pipeline(&mock, RedirectOptions::default());

        pipeline
            .run(request(HttpMethod::Post, "https://h.test/submit"))
            .await
            .unwrap();

        let sent = mock.requests();
        assert_eq!(sent[1].method, HttpMethod::Post);
        assert_eq!(sent[1].text().as_deref(), Some("payload"));
        assert_eq!(sent[1].url.as_str(), "https://h.test/moved");
    }

    #[tokio::test]
    async fn test_follow_up_strips_authorization() {
        let mock = Arc::new(MockTransport::new(vec![
            HttpResponse::new(301).with_header(header::LOCATION, "https://cdn.test/file"),
            HttpResponse::new(200),
        ]));
        let pipeline = pipeline(&mock, RedirectOptions::default());

        pipeline
            .run(request(HttpMethod::Get, "https://h.test/file"))
            .await
            .unwrap();

        let sent = mock.requests();
        assert!(sent[0].headers.contains(header::AUTHORIZATION));
        assert!(!sent[1].headers.contains(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_302_not_followed_for_post() {
        let mock = Arc::new(MockTransport::fixed(
            HttpResponse::new(302).with_header(header::LOCATION, "/elsewhere"),
        ));
        let pipeline = pipeline(&mock, RedirectOptions::default());

        let failure = pipeline
            .run(request(HttpMethod::Post, "https://h.test/submit"))
            .await
            .unwrap_err();
        assert_eq!(failure.error.status(), Some(302));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_used_when_location_missing() {
        let mock = Arc::new(MockTransport::new(vec![
            HttpResponse::new(302).with_header(header::RETRY_AFTER, "https://h.test/next"),
            HttpResponse::new(200),
        ]));
        let pipeline = pipeline(&mock, RedirectOptions::default());

        pipeline
            .run(request(HttpMethod::Get, "https://h.test/first"))
            .await
            .unwrap();
        assert_eq!(mock.requests()[1].url.path(), "/next");
    }

    #[tokio::test]
    async fn test_relative_locations_resolve_against_request_url() {
        for (location, expected) in [
            ("next", "https://h.test/a/next"),
            ("?page=2", "https://h.test/a/start?page=2"),
            ("../up", "https://h.test/up"),
        ] {
            let mock = Arc::new(MockTransport::new(vec![
                HttpResponse::new(302).with_header(header::LOCATION, location),
                HttpResponse::new(200),
            ]));
            let pipeline = pipeline(&mock, RedirectOptions::default());

            let response = pipeline
                .run(request(HttpMethod::Get, "https://h.test/a/start"))
                .await
                .unwrap();
            assert_eq!(response.status(), Some(200), "{location}");
            assert_eq!(mock.requests()[1].url.as_str(), expected);
        }
    }

    #[tokio::test]
    async fn test_numeric_retry_after_is_not_a_target() {
        let mock = Arc::new(MockTransport::fixed(
            HttpResponse::new(302).with_header(header::RETRY_AFTER, "120"),
        ));
        let ctx = PipelineContext::new()
            .add(crate::context::ContextKey::AllowedStatusCodes, vec![200u16, 302]);
        let pipeline = pipeline(&mock, RedirectOptions::default());
        let http = HttpRequest::new(HttpMethod::Get, "https://h.test/wait").unwrap();

        let response = pipeline.run(PipelineRequest::new(http, ctx)).await.unwrap();
        assert_eq!(response.status(), Some(302));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_without_target_resolves_as_is() {
        let mock = Arc::new(MockTransport::fixed(HttpResponse::new(300)));
        let ctx_codes = PipelineContext::new()
            .add(crate::context::ContextKey::AllowedStatusCodes, vec![200u16, 300]);
        let pipeline = pipeline(&mock, RedirectOptions::default());
        let http = HttpRequest::new(HttpMethod::Get, "https://h.test/choices").unwrap();

        let response = pipeline
            .run(PipelineRequest::new(http, ctx_codes))
            .await
            .unwrap();
        assert_eq!(response.status(), Some(300));
        assert_eq!(mock.requests().len(), 1);
    }
}
