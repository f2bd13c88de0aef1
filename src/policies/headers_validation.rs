use crate::error::{PipelineError, Result};
use crate::message::PipelineResponse;
use crate::stage::{BoxFut, PipelineStage};

/// Fails a response whose echoed headers differ from the request's.
///
/// Services that echo `x-ms-client-request-id` (and similar) let the client
/// detect responses that do not belong to the request it sent. A header
/// missing on either side compares as `NIL`.
#[derive(Debug, Clone, Default)]
pub struct HeadersValidationPolicy {
    headers: Vec<String>,
}

impl HeadersValidationPolicy {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers }
    }
}

impl PipelineStage for HeadersValidationPolicy {
    fn kind(&self) -> &'static str {
        "headers-validation"
    }

    fn on_response<'a>(&'a self, response: &'a mut PipelineResponse) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            let Some(http_response) = &response.http_response else {
                return Ok(());
            };
            for name in &self.headers {
                let expected = response.http_request.headers.get(name).unwrap_or("NIL");
                let actual = http_response.headers.get(name).unwrap_or("NIL");
                if expected != actual {
                    return Err(PipelineError::HeaderMismatch {
                        header: name.clone(),
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }
            Ok(())
        })
    }
}
