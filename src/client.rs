//! Service client wrapper around a [`Pipeline`].
//!
//! [`PipelineClient`] owns a base URL, the client options and the pipeline
//! built from them. Generated service clients call [`PipelineClient::url`]
//! to resolve operation paths and [`PipelineClient::request`] to run a call.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::message::{header, HttpRequest, HttpResponse, PipelineRequest};
use crate::options::ClientOptions;
use crate::paged::PageableClient;
use crate::pipeline::Pipeline;
use crate::policies::{
    AnonymousAccessPolicy, BearerTokenCredentialPolicy, ContentDecodePolicy, HeadersPolicy,
    LoggingPolicy, RedirectPolicy, RetryPolicy, TokenCredential, UserAgentPolicy,
};
use crate::stage::PipelineStage;
use crate::transport::{ReqwestTransport, Transport, DEFAULT_ALLOWED_STATUS_CODES};

/// The outcome of a successful call.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub http_response: HttpResponse,
    /// Raw response body, empty when none was delivered.
    pub body: Bytes,
    /// The body as decoded by a decode stage, if one ran.
    pub deserialized: Option<Value>,
}

impl ClientResponse {
    /// The decoded payload, falling back to parsing the raw body as JSON.
    pub fn value(&self) -> Option<Value> {
        self.deserialized
            .clone()
            .or_else(|| serde_json::from_slice(&self.body).ok())
    }

    /// Deserialize the payload into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.deserialized {
            Some(value) => Ok(T::deserialize(value)?),
            None => Ok(serde_json::from_slice(&self.body)?),
        }
    }

    pub fn status(&self) -> u16 {
        self.http_response.status
    }
}

/// Base for pipeline-based service clients.
#[derive(Debug, Clone)]
pub struct PipelineClient {
    base_url: String,
    pipeline: Pipeline,
    options: ClientOptions,
}

impl PipelineClient {
    pub fn builder(base_url: impl Into<String>) -> PipelineClientBuilder {
        PipelineClientBuilder::new(base_url)
    }

    /// Base URL, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Resolve `template` against the base URL and substitute `{key}`
    /// placeholders.
    ///
    /// Absolute `http(s)` templates are used as they are; anything else is
    /// taken relative to the base URL, leading `/` ignored.
    ///
    /// ```
    /// use sdk_pipeline::client::PipelineClient;
    /// use sdk_pipeline::transport::MockTransport;
    /// use sdk_pipeline::message::HttpResponse;
    /// use std::sync::Arc;
    ///
    /// let client = PipelineClient::builder("https://acct.blob.test")
    ///     .with_transport(Arc::new(MockTransport::fixed(HttpResponse::new(200))))
    ///     .build()
    ///     .unwrap();
    /// let url = client.url("/{container}/{blob}", &[("container", "c"), ("blob", "b.txt")]).unwrap();
    /// assert_eq!(url.as_str(), "https://acct.blob.test/c/b.txt");
    /// ```
    pub fn url(&self, template: &str, kwargs: &[(&str, &str)]) -> Result<Url> {
        let mut url = if template.starts_with("http://") || template.starts_with("https://") {
            template.to_string()
        } else {
            let relative = template.strip_prefix('/').unwrap_or(template);
            format!("{}{}", self.base_url, relative)
        };
        for (key, value) in kwargs {
            url = url.replace(&format!("{{{key}}}"), value);
        }
        Ok(Url::parse(&url)?)
    }

    /// Run `request` through the pipeline.
    ///
    /// A status outside the context's allowed codes (default `[200]`) is an
    /// error even when every stage let the response through.
    pub async fn request(
        &self,
        request: HttpRequest,
        context: PipelineContext,
    ) -> Result<ClientResponse> {
        let span = tracing::debug_span!(
            "pipeline_request",
            method = %request.method,
            path = %request.url.path()
        );
        let pipeline_request = PipelineRequest::new(request, context).with_span(span);

        let response = match self.pipeline.run(pipeline_request).await {
            Ok(response) => response,
            Err(failure) => {
                log_error_body(&failure.response.span, failure.response.context.deserialized_data());
                return Err(failure.into_error());
            }
        };

        let Some(http_response) = response.http_response else {
            return Err(PipelineError::Transport(
                "pipeline completed without a response".into(),
            ));
        };
        let allowed = response
            .context
            .allowed_status_codes()
            .unwrap_or(DEFAULT_ALLOWED_STATUS_CODES);
        if !allowed.contains(&http_response.status) {
            log_error_body(&response.span, response.context.deserialized_data());
            return Err(http_response.status_error());
        }

        Ok(ClientResponse {
            body: http_response.body.clone().unwrap_or_default(),
            deserialized: response.context.deserialized_data().cloned(),
            http_response,
        })
    }
}

fn log_error_body(span: &tracing::Span, data: Option<&Value>) {
    let Some(Value::Object(fields)) = data else {
        return;
    };
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let lines: Vec<String> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    tracing::debug!(parent: span, "{}", lines.join("\n"));
}

#[async_trait]
impl PageableClient for PipelineClient {
    async fn request(&self, request: HttpRequest, context: PipelineContext) -> Result<ClientResponse> {
        PipelineClient::request(self, request, context).await
    }

    fn url(&self, template: &str, kwargs: &[(&str, &str)]) -> Result<Url> {
        PipelineClient::url(self, template, kwargs)
    }

    fn options(&self) -> &ClientOptions {
        &self.options
    }
}

/// Builder for [`PipelineClient`].
///
/// Without explicit policies the client gets the stock chain: headers
/// (with `x-ms-version` when an API version is set), user agent,
/// authentication, retry, redirect, content decode and logging.
pub struct PipelineClientBuilder {
    base_url: String,
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
    policies: Option<Vec<Arc<dyn PipelineStage>>>,
    sdk_name: String,
    sdk_version: String,
    credential: Option<(Arc<dyn TokenCredential>, Vec<String>)>,
}

impl PipelineClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            options: ClientOptions::default(),
            transport: None,
            policies: None,
            sdk_name: env!("CARGO_PKG_NAME").to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            credential: None,
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the stock policy chain.
    pub fn with_policies(mut self, policies: Vec<Arc<dyn PipelineStage>>) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Name and version reported in the `User-Agent` header.
    pub fn with_sdk(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.sdk_name = name.into();
        self.sdk_version = version.into();
        self
    }

    /// Authenticate with bearer tokens for `scopes`.
    pub fn with_credential(mut self, credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        self.credential = Some((credential, scopes));
        self
    }

    fn stock_policies(&self) -> Vec<Arc<dyn PipelineStage>> {
        let options = &self.options;
        let mut headers = HeadersPolicy::default();
        if let Some(version) = &options.api_version {
            headers = headers.with_header(header::VERSION, version.as_str());
        }
        let authentication: Arc<dyn PipelineStage> = match &self.credential {
            Some((credential, scopes)) => Arc::new(BearerTokenCredentialPolicy::new(
                credential.clone(),
                scopes.clone(),
            )),
            None => Arc::new(AnonymousAccessPolicy::new()),
        };

        vec![
            Arc::new(headers),
            Arc::new(UserAgentPolicy::new(
                &self.sdk_name,
                &self.sdk_version,
                &options.telemetry,
            )),
            authentication,
            Arc::new(
                RetryPolicy::new(options.retry.clone())
                    .with_event_handler(options.event_handler.clone()),
            ),
            Arc::new(
                RedirectPolicy::new(options.redirect.clone())
                    .with_event_handler(options.event_handler.clone()),
            ),
            Arc::new(ContentDecodePolicy::new()),
            Arc::new(LoggingPolicy::new(&options.logging)),
        ]
    }

    pub fn build(self) -> Result<PipelineClient> {
        let mut base_url = self.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Url::parse(&base_url)?;

        if let Some((credential, _)) = &self.credential {
            credential.validate()?;
        }

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(ReqwestTransport::new(&self.options.transport)?),
        };
        let policies = match &self.policies {
            Some(policies) => policies.clone(),
            None => self.stock_policies(),
        };
        let pipeline = Pipeline::with_options(transport, policies, &self.options)?;

        Ok(PipelineClient {
            base_url,
            pipeline,
            options: self.options,
        })
    }
}

impl std::fmt::Debug for PipelineClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineClientBuilder")
            .field("base_url", &self.base_url)
            .field("sdk_name", &self.sdk_name)
            .field("sdk_version", &self.sdk_version)
            .field("has_transport", &self.transport.is_some())
            .field("has_credential", &self.credential.is_some())
            .finish()
    }
}
