//! Transports and the terminal stage that drives them.
//!
//! The [`Transport`] trait is the only place real network I/O happens.
//! [`TransportStage`] sits at the bottom of every pipeline: it checks the
//! call's cancellation token before and after I/O, hands the request to
//! the transport and turns a status outside the allowed set into a
//! failure that still carries the response.
//!
//! ```text
//! stage 1 ──► stage 2 ──► ... ──► TransportStage ──► Transport::send()
//!                                                          │
//!                                          ┌───────────────┴──────────┐
//!                                   ReqwestTransport            MockTransport
//! ```

pub mod mock;
pub mod reqwest_client;

pub use mock::MockTransport;
pub use reqwest_client::ReqwestTransport;

use crate::error::{PipelineError, Result};
use crate::message::{HttpRequest, HttpResponse, PipelineFailure, PipelineRequest, PipelineResponse};
use crate::stage::StageResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Status codes accepted when the context names none.
pub const DEFAULT_ALLOWED_STATUS_CODES: &[u16] = &[200];

/// Abstraction over HTTP clients.
///
/// Implementors send one request and report status, headers and raw body
/// bytes, or a transport-level error. Redirects must not be followed here;
/// that is a stage's job.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and wait for the complete response.
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// The terminal stage of every pipeline.
#[derive(Clone)]
pub struct TransportStage {
    transport: Arc<dyn Transport>,
}

impl TransportStage {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn name(&self) -> &'static str {
        self.transport.name()
    }

    /// Send the request and resolve the call.
    pub async fn process(&self, request: PipelineRequest) -> StageResult {
        let token = request.context.cancellation_token().cloned();
        if let Some(token) = &token {
            token.start();
            if token.is_cancelled() {
                return Err(cancelled(&request));
            }
        }

        tracing::debug!(
            parent: &request.span,
            transport = self.name(),
            "sending {} {}",
            request.http_request.method,
            request.http_request.url
        );
        let result = self.transport.send(&request.http_request).await;

        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(cancelled(&request));
        }

        let mut http_response = match result {
            Ok(response) => response,
            Err(error) => {
                let response = PipelineResponse::new(&request, None);
                return Err(PipelineFailure::new(error, response));
            }
        };
        http_response.request = Some(request.http_request.clone());

        let status = http_response.status;
        let allowed = request
            .context
            .allowed_status_codes()
            .unwrap_or(DEFAULT_ALLOWED_STATUS_CODES)
            .contains(&status);
        let error = (!allowed).then(|| http_response.status_error());
        let response = PipelineResponse::new(&request, Some(http_response));

        match error {
            None => Ok(response),
            Some(error) => Err(PipelineFailure::new(error, response)),
        }
    }
}

impl std::fmt::Debug for TransportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStage")
            .field("transport", &self.name())
            .finish()
    }
}

fn cancelled(request: &PipelineRequest) -> PipelineFailure {
    tracing::debug!(parent: &request.span, "request cancelled");
    PipelineFailure::new(PipelineError::Cancelled, PipelineResponse::new(request, None))
}
