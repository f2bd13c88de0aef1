use std::sync::Arc;

use crate::backoff::BackoffConfig;
use crate::error::PipelineError;
use crate::events::{emit, Event, EventHandler};
use crate::message::{PipelineFailure, PipelineRequest};
use crate::stage::{BoxFut, Next, PipelineStage, StageResult};

/// Re-sends the request after transient failures.
///
/// Retries transport errors and the statuses listed in the
/// [`BackoffConfig`], sleeping between attempts. The call's cancellation
/// token is checked before and after every sleep. Everything between this
/// stage and the transport runs once per attempt.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    config: BackoffConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl RetryPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Option<Arc<dyn EventHandler>>) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish()
    }
}

fn is_cancelled(request: &PipelineRequest) -> bool {
    request
        .context
        .cancellation_token()
        .is_some_and(|t| t.is_cancelled())
}

impl PipelineStage for RetryPolicy {
    fn kind(&self) -> &'static str {
        crate::pipeline::RETRY_STAGE_KIND
    }

    fn process<'a>(&'a self, request: PipelineRequest, next: Next<'a>) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                let failure = match next.run(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(failure) => failure,
                };

                if attempt >= self.config.max_retries || !self.config.is_retryable(&failure.error) {
                    return Err(failure);
                }
                if is_cancelled(&request) {
                    return Err(PipelineFailure::new(PipelineError::Cancelled, failure.response));
                }

                let delay = self.config.delay_after(attempt, &failure.error);
                attempt += 1;
                let reason = failure.error.to_string();
                tracing::info!(
                    parent: &request.span,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after: {reason}"
                );
                emit(
                    &self.event_handler,
                    Event::Retry {
                        attempt,
                        delay,
                        reason,
                    },
                );

                tokio::time::sleep(delay).await;

                if is_cancelled(&request) {
                    return Err(PipelineFailure::new(PipelineError::Cancelled, failure.response));
                }
            }
        })
    }
}
