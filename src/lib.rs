//! # SDK Pipeline
//!
//! Transport-independent HTTP request/response pipeline for service SDK
//! clients.
//!
//! A call travels down an ordered chain of stages (policies) to a
//! transport, and its response or error travels back up the same chain in
//! reverse. Per-call data rides along in an immutable [`PipelineContext`].
//! XML services are decoded to JSON through a declarative [`XmlMap`], and
//! paged operations are walked lazily with a [`PagedCollection`].
//!
//! ## Core Concepts
//!
//! - **[`PipelineStage`]**: object-safe stage with `on_request`,
//!   `on_response` and `on_error` hooks. The default `process` drives them;
//!   stages that re-send requests (retry, redirect) override it.
//! - **[`Pipeline`]**: an immutable stage chain over one [`Transport`].
//! - **[`PipelineContext`]**: persistent key/value list; adding a value
//!   yields a new context and never touches the old one.
//! - **[`PipelineClient`]**: base URL, options and pipeline for one
//!   service; runs calls and enforces allowed status codes.
//! - **[`xml::decode`]**: streaming XML to JSON decoding, map-driven or
//!   inferred.
//! - **[`PagedCollection`]**: continuation-token pagination over a
//!   [`PageableClient`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use sdk_pipeline::{ClientOptions, PipelineClient, PipelineContext};
//! use sdk_pipeline::message::{HttpMethod, HttpRequest};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Setting { key: String, value: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PipelineClient::builder("https://config.example.test")
//!         .with_options(ClientOptions::default().with_api_version("1.0"))
//!         .build()?;
//!
//!     let url = client.url("kv/{key}", &[("key", "color")])?;
//!     let response = client
//!         .request(HttpRequest::from_url(HttpMethod::Get, url), PipelineContext::new())
//!         .await?;
//!     let setting: Setting = response.json()?;
//!     println!("{} = {}", setting.key, setting.value);
//!     Ok(())
//! }
//! ```
//!
//! ## Custom stages
//!
//! ```
//! use sdk_pipeline::message::PipelineRequest;
//! use sdk_pipeline::stage::{BoxFut, PipelineStage};
//! use sdk_pipeline::Result;
//!
//! struct RequestId;
//!
//! impl PipelineStage for RequestId {
//!     fn kind(&self) -> &'static str {
//!         "request-id"
//!     }
//!
//!     fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
//!         Box::pin(async move {
//!             request.http_request.headers.insert("x-ms-client-request-id", "0001");
//!             Ok(())
//!         })
//!     }
//! }
//! ```

pub mod backoff;
pub mod cancellation;
pub mod client;
pub mod context;
pub mod error;
pub mod events;
pub mod message;
pub mod options;
pub mod paged;
pub mod pipeline;
pub mod policies;
pub mod stage;
pub mod transport;
pub mod xml;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use cancellation::CancellationToken;
pub use client::{ClientResponse, PipelineClient, PipelineClientBuilder};
pub use context::{ContextKey, ContextSupporting, ContextValue, PipelineContext};
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use message::{
    HttpHeaders, HttpMethod, HttpRequest, HttpResponse, PipelineFailure, PipelineRequest,
    PipelineResponse, RequestHistory,
};
pub use options::{
    ClientOptions, LoggingOptions, RedirectOptions, TelemetryOptions, TransportOptions,
};
pub use paged::{PageableClient, PagedCodingKeys, PagedCollection};
pub use pipeline::Pipeline;
pub use stage::{BoxFut, ErrorOutcome, Next, PipelineStage, StageResult};
pub use transport::{MockTransport, ReqwestTransport, Transport};
pub use xml::{XmlMap, XmlMetadata, XmlModel, XmlModelType};
