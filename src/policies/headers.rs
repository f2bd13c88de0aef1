use crate::context::{ContextKey, ContextValue};
use crate::error::Result;
use crate::message::{HttpHeaders, PipelineRequest};
use crate::stage::{BoxFut, PipelineStage};

/// Adds default headers to every request, then the call's own headers.
///
/// Defaults never overwrite a header the request already carries. Headers
/// found in the context under [`ContextKey::Headers`] always win.
#[derive(Debug, Clone, Default)]
pub struct HeadersPolicy {
    headers: HttpHeaders,
}

impl HeadersPolicy {
    pub fn new(headers: HttpHeaders) -> Self {
        Self { headers }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }
}

impl PipelineStage for HeadersPolicy {
    fn kind(&self) -> &'static str {
        "headers"
    }

    fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            let target = &mut request.http_request.headers;
            for (name, value) in self.headers.iter() {
                if !target.contains(name) {
                    target.insert(name, value);
                }
            }
            if let Some(extra) = request
                .context
                .value(ContextKey::Headers)
                .and_then(ContextValue::as_headers)
            {
                target.extend(extra);
            }
            Ok(())
        })
    }
}
