//! Pipeline construction and execution.
//!
//! A [`Pipeline`] is an ordered list of stages ending in exactly one
//! [`TransportStage`]. Running a request sends it down through every
//! stage's request hook in construction order and back up through the
//! response or error hooks in reverse order:
//!
//! ```text
//! run(request)
//!   A.on_request ─► B.on_request ─► C.on_request ─► transport
//!                                                      │
//!   A.on_response ◄─ B.on_response ◄─ C.on_response ◄──┘
//! ```
//!
//! The pipeline itself holds no per-call state; one instance serves any
//! number of concurrent calls.

use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::message::PipelineRequest;
use crate::options::ClientOptions;
use crate::stage::{Next, PipelineStage, StageResult};
use crate::transport::{Transport, TransportStage};
use std::sync::Arc;
use std::time::Instant;

/// Kind of the stage that separates per-request from per-retry policies.
pub const RETRY_STAGE_KIND: &str = "retry";

/// An immutable chain of stages over a transport.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
    transport: TransportStage,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Pipeline {
    /// Chain `policies` in order over `transport`.
    pub fn new(transport: Arc<dyn Transport>, policies: Vec<Arc<dyn PipelineStage>>) -> Self {
        Self {
            stages: policies,
            transport: TransportStage::new(transport),
            event_handler: None,
        }
    }

    /// Chain SDK `policies` with the user policies from `options`.
    ///
    /// The resulting order is:
    ///
    /// 1. SDK policies before the retry stage
    /// 2. user per-request policies
    /// 3. the retry stage and the SDK policies after it
    /// 4. user per-retry policies
    ///
    /// Without a retry stage, user per-request policies go last and user
    /// per-retry policies are a configuration error.
    pub fn with_options(
        transport: Arc<dyn Transport>,
        policies: Vec<Arc<dyn PipelineStage>>,
        options: &ClientOptions,
    ) -> Result<Self> {
        let retry_index = policies.iter().position(|p| p.kind() == RETRY_STAGE_KIND);

        let combined = match retry_index {
            Some(idx) => {
                let mut combined = Vec::with_capacity(
                    policies.len()
                        + options.per_request_policies.len()
                        + options.per_retry_policies.len(),
                );
                combined.extend_from_slice(&policies[..idx]);
                combined.extend(options.per_request_policies.iter().cloned());
                combined.extend_from_slice(&policies[idx..]);
                combined.extend(options.per_retry_policies.iter().cloned());
                combined
            }
            None => {
                if !options.per_retry_policies.is_empty() {
                    return Err(PipelineError::InvalidConfig(
                        "per-retry policies were supplied, but the pipeline has no retry policy"
                            .into(),
                    ));
                }
                let mut combined = policies;
                combined.extend(options.per_request_policies.iter().cloned());
                combined
            }
        };

        let mut pipeline = Self::new(transport, combined);
        pipeline.event_handler = options.event_handler.clone();
        Ok(pipeline)
    }

    /// Set an event handler for call start/end events.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Stage kinds in execution order, transport excluded.
    pub fn stage_kinds(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Send `request` through every stage and the transport.
    pub async fn run(&self, request: PipelineRequest) -> StageResult {
        let method = request.http_request.method.to_string();
        let url = request.http_request.url.to_string();
        emit(
            &self.event_handler,
            Event::RequestStart {
                method: method.clone(),
                url: url.clone(),
            },
        );
        let started = Instant::now();

        let result = Next::new(&self.stages, &self.transport).run(request).await;

        let (status, ok) = match &result {
            Ok(response) => (response.status(), true),
            Err(failure) => (failure.response.status(), false),
        };
        emit(
            &self.event_handler,
            Event::ResponseEnd {
                method,
                url,
                status,
                ok,
                elapsed: started.elapsed(),
            },
        );
        result
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_kinds())
            .field("transport", &self.transport.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextSupporting, PipelineContext};
    use crate::events::RecordingEventHandler;
    use crate::message::{HttpMethod, HttpRequest, HttpResponse, PipelineFailure, PipelineResponse};
    use crate::stage::{BoxFut, ErrorOutcome};
    use crate::transport::MockTransport;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail_request: bool,
        handle_errors: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: log.clone(),
                fail_request: false,
                handle_errors: false,
            })
        }
    }

    impl PipelineStage for Recorder {
        fn kind(&self) -> &'static str {
            self.name
        }

        fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:request", self.name));
                request.add_value(self.name, true);
                if self.fail_request {
                    return Err(PipelineError::Other(format!("{} refused", self.name)));
                }
                Ok(())
            })
        }

        fn on_response<'a>(&'a self, _response: &'a mut PipelineResponse) -> BoxFut<'a, Result<()>> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:response", self.name));
                Ok(())
            })
        }

        fn on_error<'a>(&'a self, failure: PipelineFailure) -> BoxFut<'a, ErrorOutcome> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:error", self.name));
                if self.handle_errors {
                    ErrorOutcome::Handled(failure.response)
                } else {
                    ErrorOutcome::Propagate(failure)
                }
            })
        }
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new(
            HttpRequest::new(HttpMethod::Get, "https://h.test/").unwrap(),
            PipelineContext::new(),
        )
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn test_hooks_run_down_then_up_in_reverse() {
        let log: Log = Arc::default();
        let pipeline = Pipeline::new(
            Arc::new(MockTransport::fixed(HttpResponse::new(200))),
            vec![Recorder::new("A", &log), Recorder::new("B", &log), Recorder::new("C", &log)],
        );

        let response = pipeline.run(request()).await.unwrap();
        assert_eq!(
            entries(&log),
            vec![
                "A:request", "B:request", "C:request", "C:response", "B:response", "A:response"
            ]
        );
        // Context written on the way down is visible on the way up.
        assert!(response.value("A").is_some());
        assert!(response.value("C").is_some());
    }

    #[tokio::test]
    async fn test_errors_travel_up_in_reverse() {
        let log: Log = Arc::default();
        let pipeline = Pipeline::new(
            Arc::new(MockTransport::fixed(HttpResponse::new(500))),
            vec![Recorder::new("A", &log), Recorder::new("B", &log), Recorder::new("C", &log)],
        );

        let failure = pipeline.run(request()).await.unwrap_err();
        assert_eq!(failure.error.status(), Some(500));
        assert_eq!(
            entries(&log),
            vec!["A:request", "B:request", "C:request", "C:error", "B:error", "A:error"]
        );
    }

    #[tokio::test]
    async fn test_request_hook_error_short_circuits() {
        let log: Log = Arc::default();
        let mock = Arc::new(MockTransport::fixed(HttpResponse::new(200)));
        let failing = Arc::new(Recorder {
            name: "B",
            log: log.clone(),
            fail_request: true,
            handle_errors: false,
        });
        let pipeline = Pipeline::new(
            mock.clone(),
            vec![Recorder::new("A", &log), failing, Recorder::new("C", &log)],
        );

        let failure = pipeline.run(request()).await.unwrap_err();
        assert!(failure.response.http_response.is_none());
        assert!(mock.requests().is_empty());
        // B fails its own request hook; only A sees the error on the way up.
        assert_eq!(entries(&log), vec!["A:request", "B:request", "A:error"]);
    }

    #[tokio::test]
    async fn test_handled_error_resolves_successfully() {
        let log: Log = Arc::default();
        let handler = Arc::new(Recorder {
            name: "B",
            log: log.clone(),
            fail_request: false,
            handle_errors: true,
        });
        let pipeline = Pipeline::new(
            Arc::new(MockTransport::fixed(HttpResponse::new(404))),
            vec![Recorder::new("A", &log), handler, Recorder::new("C", &log)],
        );

        let response = pipeline.run(request()).await.unwrap();
        assert_eq!(response.status(), Some(404));
        assert_eq!(
            entries(&log),
            vec!["A:request", "B:request", "C:request", "C:error", "B:error", "A:response"]
        );
    }

    #[test]
    fn test_user_policies_bracket_retry_stage() {
        let log: Log = Arc::default();
        let options = ClientOptions::default()
            .with_per_request_policy(Recorder::new("user-request", &log))
            .with_per_retry_policy(Recorder::new("user-retry", &log));
        let pipeline = Pipeline::with_options(
            Arc::new(MockTransport::fixed(HttpResponse::new(200))),
            vec![
                Recorder::new("headers", &log),
                Recorder::new("retry", &log),
                Recorder::new("auth", &log),
            ],
            &options,
        )
        .unwrap();

        assert_eq!(
            pipeline.stage_kinds(),
            vec!["headers", "user-request", "retry", "auth", "user-retry"]
        );
    }

    #[test]
    fn test_per_retry_without_retry_stage_is_rejected() {
        let log: Log = Arc::default();
        let options = ClientOptions::default().with_per_retry_policy(Recorder::new("x", &log));
        let err = Pipeline::with_options(
            Arc::new(MockTransport::fixed(HttpResponse::new(200))),
            vec![Recorder::new("headers", &log)],
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn test_per_request_appended_without_retry_stage() {
        let log: Log = Arc::default();
        let options = ClientOptions::default().with_per_request_policy(Recorder::new("user", &log));
        let pipeline = Pipeline::with_options(
            Arc::new(MockTransport::fixed(HttpResponse::new(200))),
            vec![Recorder::new("headers", &log)],
            &options,
        )
        .unwrap();
        assert_eq!(pipeline.stage_kinds(), vec!["headers", "user"]);
    }

    #[tokio::test]
    async fn test_run_emits_start_and_end() {
        let recorder = Arc::new(RecordingEventHandler::new());
        let pipeline = Pipeline::new(Arc::new(MockTransport::fixed(HttpResponse::new(200))), vec![])
            .with_event_handler(recorder.clone());

        pipeline.run(request()).await.unwrap();
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            Event::ResponseEnd { status: Some(200), ok: true, .. }
        ));
    }
}
