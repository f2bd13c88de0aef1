//! Authentication stages.
//!
//! [`BearerTokenCredentialPolicy`] asks a [`TokenCredential`] for a token and
//! attaches it as `Authorization: Bearer <token>`. [`AnonymousAccessPolicy`]
//! leaves requests untouched, for clients that authenticate some other way
//! (SAS query parameters, public endpoints).

use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::message::{header, PipelineRequest};
use crate::stage::{BoxFut, PipelineStage};

/// An access token and when it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: SystemTime,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_on: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_on,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_on <= SystemTime::now()
    }
}

/// Source of access tokens.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn TokenCredential>`.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Fetch a token valid for `scopes`.
    async fn token(&self, scopes: &[String]) -> Result<AccessToken>;

    /// Check the credential's configuration before first use.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Passes requests through without credentials.
#[derive(Debug, Clone, Default)]
pub struct AnonymousAccessPolicy;

impl AnonymousAccessPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for AnonymousAccessPolicy {
    fn kind(&self) -> &'static str {
        "authentication"
    }
}

/// Attaches a bearer token obtained from a [`TokenCredential`].
///
/// The first token fetched is cached and shared by every call through this
/// stage. A new token is only requested while nothing is cached.
pub struct BearerTokenCredentialPolicy {
    credential: Arc<dyn TokenCredential>,
    scopes: Vec<String>,
    cached: Mutex<Option<AccessToken>>,
}

impl BearerTokenCredentialPolicy {
    pub fn new(credential: Arc<dyn TokenCredential>, scopes: Vec<String>) -> Self {
        Self {
            credential,
            scopes,
            cached: Mutex::new(None),
        }
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    // TODO: refresh proactively when the cached token is close to `expires_on`.
    async fn current_token(&self) -> Result<String> {
        let cached = self.cached.lock().as_ref().map(|t| t.token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let fresh = self.credential.token(&self.scopes).await?;
        if fresh.token.is_empty() {
            return Err(PipelineError::Authentication("Token cannot be empty".into()));
        }
        let value = fresh.token.clone();
        *self.cached.lock() = Some(fresh);
        Ok(value)
    }
}

impl std::fmt::Debug for BearerTokenCredentialPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenCredentialPolicy")
            .field("scopes", &self.scopes)
            .field("cached", &self.cached.lock().is_some())
            .finish()
    }
}

impl PipelineStage for BearerTokenCredentialPolicy {
    fn kind(&self) -> &'static str {
        "authentication"
    }

    fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            let token = self.current_token().await?;
            request
                .http_request
                .headers
                .insert(header::AUTHORIZATION, format!("Bearer {token}"));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::message::{HttpMethod, HttpRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingCredential {
        token: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenCredential for CountingCredential {
        async fn token(&self, scopes: &[String]) -> Result<AccessToken> {
            assert_eq!(scopes, ["https://storage.test/.default".to_string()]);
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(AccessToken::new(
                self.token.clone(),
                SystemTime::now() + Duration::from_secs(3600),
            ))
        }
    }

    fn credential(token: &str) -> Arc<CountingCredential> {
        Arc::new(CountingCredential {
            token: token.into(),
            calls: AtomicUsize::new(0),
        })
    }

    fn request() -> PipelineRequest {
        PipelineRequest::new(
            HttpRequest::new(HttpMethod::Get, "https://h.test/").unwrap(),
            PipelineContext::new(),
        )
    }

    #[tokio::test]
    async fn test_bearer_token_attached_and_cached() {
        let cred = credential("abc");
        let policy =
            BearerTokenCredentialPolicy::new(cred.clone(), vec!["https://storage.test/.default".into()]);

        let mut first = request();
        let mut second = request();
        policy.on_request(&mut first).await.unwrap();
        policy.on_request(&mut second).await.unwrap();

        assert_eq!(
            first.http_request.headers.get(header::AUTHORIZATION),
            Some("Bearer abc")
        );
        assert_eq!(
            second.http_request.headers.get(header::AUTHORIZATION),
            Some("Bearer abc")
        );
        assert_eq!(cred.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let policy = BearerTokenCredentialPolicy::new(
            credential(""),
            vec!["https://storage.test/.default".into()],
        );
        let mut req = request();
        let err = policy.on_request(&mut req).await.unwrap_err();
        assert!(matches!(err, PipelineError::Authentication(_)));
        assert!(!req.http_request.headers.contains(header::AUTHORIZATION));
    }

    #[tokio::test]
    async fn test_anonymous_leaves_request_alone() {
        let mut req = request();
        AnonymousAccessPolicy::new().on_request(&mut req).await.unwrap();
        assert!(req.http_request.headers.is_empty());
    }

    #[test]
    fn test_access_token_expiry() {
        let past = AccessToken::new("t", SystemTime::now() - Duration::from_secs(1));
        assert!(past.is_expired());
    }
}
