//! The stage contract every policy in the chain implements.
//!
//! A stage sees each call twice: once on the way down toward the transport
//! (`on_request`) and once on the way back up (`on_response` on success,
//! `on_error` on failure). The default [`PipelineStage::process`] drives
//! those hooks around a call to the rest of the chain:
//!
//! 1. `on_request`. An error here fails the call immediately with a
//!    response that carries no HTTP response; later stages never run.
//! 2. `next.run(request)`.
//! 3. On success, `on_response`. An error here fails the call, keeping the
//!    response that was being inspected.
//! 4. On failure, `on_error`, which either handles the failure by producing
//!    a terminal response or propagates it unchanged.
//!
//! Stages that need to issue more than one downstream attempt (redirects,
//! retries) override `process` and call `next.run` as often as they need;
//! [`Next`] is `Copy` for that reason.

use crate::error::Result;
use crate::message::{PipelineFailure, PipelineRequest, PipelineResponse};
use crate::transport::TransportStage;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, pinned, Send future -- the return type of the stage hooks.
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a call resolves to at each point of the chain.
pub type StageResult = std::result::Result<PipelineResponse, PipelineFailure>;

/// Verdict of an [`PipelineStage::on_error`] hook.
#[derive(Debug)]
pub enum ErrorOutcome {
    /// The stage absorbed the failure; the call resolves with this response.
    Handled(PipelineResponse),
    /// The failure travels on toward the caller.
    Propagate(PipelineFailure),
}

/// Object-safe trait for pipeline stages (policies).
///
/// Stages are shared between concurrent calls as `Arc<dyn PipelineStage>`;
/// any per-call state belongs in the request's context, not in the stage.
pub trait PipelineStage: Send + Sync {
    /// Stable identifier for the stage type (e.g. `"headers"`, `"retry"`).
    fn kind(&self) -> &'static str;

    /// Inspect or mutate the request before it moves downstream.
    fn on_request<'a>(&'a self, _request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Inspect or mutate a successful response on its way up.
    fn on_response<'a>(&'a self, _response: &'a mut PipelineResponse) -> BoxFut<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Decide whether a failure is absorbed here.
    fn on_error<'a>(&'a self, failure: PipelineFailure) -> BoxFut<'a, ErrorOutcome> {
        Box::pin(async move { ErrorOutcome::Propagate(failure) })
    }

    /// Run this stage and everything after it.
    fn process<'a>(&'a self, request: PipelineRequest, next: Next<'a>) -> BoxFut<'a, StageResult> {
        Box::pin(async move {
            let mut request = request;
            if let Err(error) = self.on_request(&mut request).await {
                let response = PipelineResponse::new(&request, None);
                return Err(PipelineFailure::new(error, response));
            }

            match next.run(request).await {
                Ok(mut response) => match self.on_response(&mut response).await {
                    Ok(()) => Ok(response),
                    Err(error) => Err(PipelineFailure::new(error, response)),
                },
                Err(failure) => match self.on_error(failure).await {
                    ErrorOutcome::Handled(response) => Ok(response),
                    ErrorOutcome::Propagate(failure) => Err(failure),
                },
            }
        })
    }
}

/// The remainder of the chain after the current stage.
///
/// Always ends in exactly one [`TransportStage`].
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn PipelineStage>],
    transport: &'a TransportStage,
}

impl<'a> Next<'a> {
    pub(crate) fn new(stages: &'a [Arc<dyn PipelineStage>], transport: &'a TransportStage) -> Self {
        Self { stages, transport }
    }

    /// Forward `request` to the next stage, or to the transport when none
    /// remain.
    pub fn run(self, request: PipelineRequest) -> BoxFut<'a, StageResult> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.process(
                request,
                Next {
                    stages: rest,
                    transport: self.transport,
                },
            ),
            None => Box::pin(self.transport.process(request)),
        }
    }

    /// Number of stages left before the transport.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("stages", &self.stages.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .field("transport", &self.transport.name())
            .finish()
    }
}
