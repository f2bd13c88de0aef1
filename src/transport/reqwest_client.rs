//! `reqwest`-backed transport.

use async_trait::async_trait;
use reqwest::{redirect, Client, Method};

use super::Transport;
use crate::error::{PipelineError, Result};
use crate::message::{HttpHeaders, HttpRequest, HttpResponse};
use crate::options::TransportOptions;

/// Transport that sends requests with a shared [`reqwest::Client`].
///
/// The client is built with redirect following disabled so the redirect
/// stage sees every 3xx response.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport from options.
    pub fn new(options: &TransportOptions) -> Result<Self> {
        let mut builder = Client::builder().redirect(redirect::Policy::none());
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an existing client. Its redirect policy is left as configured.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| PipelineError::Transport(format!("invalid method: {e}")))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers: HttpHeaders = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body: (!body.is_empty()).then_some(body),
            request: None,
        })
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}
