//! Exponential backoff with jitter for the retry stage.
//!
//! [`BackoffConfig`] decides which failures the
//! [`RetryPolicy`](crate::policies::RetryPolicy) retries and how long it
//! waits between attempts. The default never retries.

use crate::error::PipelineError;
use std::time::Duration;

/// Retry budget and delay curve.
///
/// # Example
///
/// ```
/// use sdk_pipeline::BackoffConfig;
///
/// let none = BackoffConfig::none();
/// assert_eq!(none.max_retries, 0);
///
/// let standard = BackoffConfig::standard();
/// assert_eq!(standard.max_retries, 3);
/// assert!(standard.retryable_statuses.contains(&503));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Attempts after the first one. Default: 0.
    pub max_retries: u32,

    /// Delay before the first retry. Default: 800ms.
    pub initial_delay: Duration,

    /// Growth factor per attempt. Default: 2.0.
    pub multiplier: f64,

    /// Upper bound on a single delay. Default: 60 seconds.
    pub max_delay: Duration,

    pub jitter: JitterStrategy,

    /// Statuses that trigger a retry. Default: `[429, 500, 502, 503, 504]`.
    pub retryable_statuses: Vec<u16>,

    /// Wait for the server's `Retry-After` instead of the computed delay.
    pub respect_retry_after: bool,
}

/// How the computed delay is randomised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Exactly the computed delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay / 2` plus uniform in `[0, delay / 2]`.
    Equal,
}

impl BackoffConfig {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// 3 retries starting at 800ms, doubling up to 60s, full jitter.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(800),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            respect_retry_after: true,
        }
    }

    /// 2 retries capped at 10s, for calls a user is waiting on.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            ..Self::standard()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether `error` is worth another attempt.
    ///
    /// Transport failures and the configured statuses are; cancellation and
    /// everything else is not.
    pub fn is_retryable(&self, error: &PipelineError) -> bool {
        match error {
            PipelineError::HttpError { status, .. } => self.retryable_statuses.contains(status),
            PipelineError::Request(_) | PipelineError::Transport(_) => true,
            PipelineError::Service { inner: Some(inner), .. } => self.is_retryable(inner),
            _ => false,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`, then
    /// jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }

    /// Delay before retrying after `error`, honouring `Retry-After`.
    pub fn delay_after(&self, attempt: u32, error: &PipelineError) -> Duration {
        match error {
            PipelineError::HttpError {
                retry_after: Some(after),
                ..
            } if self.respect_retry_after => *after,
            PipelineError::Service { inner: Some(inner), .. } => self.delay_after(attempt, inner),
            _ => self.delay_for_attempt(attempt),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}
