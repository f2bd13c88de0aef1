//! `User-Agent` telemetry.
//!
//! The header has the shape
//!
//! ```text
//! [<application_id> ]azsdk-rust-<sdk_name>/<sdk_version> (<platform>; <application>; <locale>)
//! ```
//!
//! where the parenthesised suffix is omitted when telemetry is disabled or
//! nothing is known about the environment.

use crate::error::Result;
use crate::message::{header, PipelineRequest};
use crate::options::TelemetryOptions;
use crate::stage::{BoxFut, PipelineStage};

const USER_AGENT_PREFIX: &str = "azsdk-rust";
const MAX_APPLICATION_ID_LEN: usize = 24;

/// Environment details folded into the user agent suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentInfo {
    /// `<os> - <arch>` style platform description.
    pub platform: Option<String>,
    /// `<name>:<version>` of the host application.
    pub application: Option<String>,
    /// Minimum deployment target of the host application.
    pub deployment_target: Option<String>,
    /// `(language, region)`.
    pub locale: Option<(String, String)>,
}

impl AgentInfo {
    /// Detect what can be detected from the running process.
    pub fn current() -> Self {
        Self {
            platform: Some(format!(
                "{} - {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            application: None,
            deployment_target: None,
            locale: std::env::var("LANG").ok().as_deref().and_then(parse_locale),
        }
    }

    fn suffix(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(platform) = &self.platform {
            parts.push(platform.clone());
        }
        if let Some(application) = &self.application {
            match &self.deployment_target {
                Some(target) => parts.push(format!("{application} -> {target}")),
                None => parts.push(application.clone()),
            }
        }
        if let Some((language, region)) = &self.locale {
            parts.push(format!("{language}_{region}"));
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

/// `en_US.UTF-8` -> `("en", "US")`.
fn parse_locale(raw: &str) -> Option<(String, String)> {
    let tag = raw.split(['.', '@']).next()?;
    let (language, region) = tag.split_once(['_', '-'])?;
    if language.is_empty() || region.is_empty() {
        return None;
    }
    Some((language.to_string(), region.to_string()))
}

/// Sets the `User-Agent` header.
///
/// A user agent already on the request that was not produced by this
/// policy is kept after ours.
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    user_agent: String,
}

impl UserAgentPolicy {
    pub fn new(sdk_name: &str, sdk_version: &str, telemetry: &TelemetryOptions) -> Self {
        Self::with_info(sdk_name, sdk_version, telemetry, &AgentInfo::current())
    }

    pub fn with_info(
        sdk_name: &str,
        sdk_version: &str,
        telemetry: &TelemetryOptions,
        info: &AgentInfo,
    ) -> Self {
        let mut user_agent = format!("{USER_AGENT_PREFIX}-{sdk_name}/{sdk_version}");

        let application_id: String = telemetry
            .application_id
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(MAX_APPLICATION_ID_LEN)
            .collect();
        if !application_id.is_empty() {
            user_agent = format!("{application_id} {user_agent}");
        }

        if !telemetry.disabled {
            if let Some(suffix) = info.suffix() {
                user_agent = format!("{user_agent} ({suffix})");
            }
        }

        Self { user_agent }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl PipelineStage for UserAgentPolicy {
    fn kind(&self) -> &'static str {
        "user-agent"
    }

    fn on_request<'a>(&'a self, request: &'a mut PipelineRequest) -> BoxFut<'a, Result<()>> {
        Box::pin(async move {
            let headers = &mut request.http_request.headers;
            let value = match headers.remove(header::USER_AGENT) {
                Some(current) if !current.contains(USER_AGENT_PREFIX) => {
                    format!("{} {}", self.user_agent, current)
                }
                _ => self.user_agent.clone(),
            };
            headers.insert(header::USER_AGENT, value);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::message::{HttpMethod, HttpRequest};

    fn info() -> AgentInfo {
        AgentInfo {
            platform: Some("linux - x86_64".into()),
            application: Some("Demo:1.2".into()),
            deployment_target: Some("5.0".into()),
            locale: Some(("en".into(), "US".into())),
        }
    }

    #[test]
    fn test_full_user_agent() {
        let telemetry = TelemetryOptions::default().with_application_id("my app");
        let policy = UserAgentPolicy::with_info("storage", "0.1.0", &telemetry, &info());
        assert_eq!(
            policy.user_agent(),
            "myapp azsdk-rust-storage/0.1.0 (linux - x86_64; Demo:1.2 -> 5.0; en_US)"
        );
    }

    #[test]
    fn test_application_id_truncated() {
        let telemetry = TelemetryOptions::default()
            .with_application_id("abcdefghijklmnopqrstuvwxyz")
            .with_disabled(true);
        let policy = UserAgentPolicy::with_info("core", "1.0", &telemetry, &info());
        assert_eq!(policy.user_agent(), "abcdefghijklmnopqrstuvwx azsdk-rust-core/1.0");
    }

    #[test]
    fn test_no_suffix_without_info() {
        let policy = UserAgentPolicy::with_info(
            "core",
            "1.0",
            &TelemetryOptions::default(),
            &AgentInfo::default(),
        );
        assert_eq!(policy.user_agent(), "azsdk-rust-core/1.0");
    }

    #[test]
    fn test_parse_locale() {
        assert_eq!(parse_locale("en_US.UTF-8"), Some(("en".into(), "US".into())));
        assert_eq!(parse_locale("C"), None);
    }

    #[tokio::test]
    async fn test_foreign_user_agent_kept_as_suffix() {
        let policy = UserAgentPolicy::with_info(
            "core",
            "1.0",
            &TelemetryOptions::default(),
            &AgentInfo::default(),
        );
        let http = HttpRequest::new(HttpMethod::Get, "https://h.test/")
            .unwrap()
            .with_header("user-agent", "curl/8.0");
        let mut request = PipelineRequest::new(http, PipelineContext::new());

        policy.on_request(&mut request).await.unwrap();
        assert_eq!(
            request.http_request.headers.get(header::USER_AGENT),
            Some("azsdk-rust-core/1.0 curl/8.0")
        );

        // A second pass does not stack our own agent twice.
        policy.on_request(&mut request).await.unwrap();
        assert_eq!(
            request.http_request.headers.get(header::USER_AGENT),
            Some("azsdk-rust-core/1.0")
        );
    }
}
