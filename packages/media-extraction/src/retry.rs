//! Error classification and exponential backoff.
//!
//! Only transient failures are retried. Permanent failures and anything we
//! cannot classify surface on first occurrence.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry-relevant category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection/timeout errors, HTTP 429 and 5xx gateway errors
    Transient,
    /// HTTP 4xx (except 429), validation failures, malformed images
    Permanent,
    /// Unclassified; logged distinctly and never auto-retried
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors that know their own retry category.
pub trait Classify {
    fn category(&self) -> ErrorCategory;
}

/// Status-code based classification shared by every HTTP-backed extractor.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an HTTP status code.
    pub fn classify_status(status: u16) -> ErrorCategory {
        match status {
            429 | 500 | 502 | 503 | 504 => ErrorCategory::Transient,
            400 | 401 | 403 | 404 => ErrorCategory::Permanent,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Human-facing advice for a failed property, derived from the HTTP status.
    pub fn actionable_message(status: Option<u16>, fallback: &str) -> String {
        match status {
            Some(403) => "blocked by anti-bot protection; try a stealthier strategy".to_string(),
            Some(401) => "listing requires authentication".to_string(),
            Some(404) => "listing not found; verify the address".to_string(),
            Some(429) => "rate limited by the site; lower the request rate".to_string(),
            Some(s) if (500..600).contains(&s) => "site error; retry later".to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub min_delay: Duration,

    /// Upper bound on the un-jittered delay
    pub max_delay: Duration,

    /// Fractional jitter added on top of the delay (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(max_retries: u32, min_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_retries,
            min_delay,
            max_delay,
            jitter: jitter.max(0.0),
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Un-jittered delay for a zero-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay including jitter: `min(min_delay * 2^attempt, max_delay) * (1 + jitter * r)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let r: f64 = rand::thread_rng().gen_range(0.0..1.0);
        base.mul_f64(1.0 + self.jitter * r)
    }
}

/// Run `op`, retrying transient failures according to `policy`.
///
/// A function that fails transiently `max_retries` times and then succeeds
/// is called `max_retries + 1` times. Permanent and unknown failures are
/// returned after a single call.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match e.category() {
                ErrorCategory::Transient if attempt < policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                ErrorCategory::Transient => {
                    warn!(attempts = attempt + 1, error = %e, "Retries exhausted");
                    return Err(e);
                }
                ErrorCategory::Permanent => return Err(e),
                ErrorCategory::Unknown => {
                    warn!(error = %e, "Unclassified failure, not retrying");
                    return Err(e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(ErrorCategory);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error ({})", self.0)
        }
    }

    impl Classify for TestError {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(4),
            0.5,
        )
    }

    #[test]
    fn test_classify_status() {
        for status in [429, 500, 502, 503, 504] {
            assert_eq!(ErrorClassifier::classify_status(status), ErrorCategory::Transient);
        }
        for status in [400, 401, 403, 404] {
            assert_eq!(ErrorClassifier::classify_status(status), ErrorCategory::Permanent);
        }
        assert_eq!(ErrorClassifier::classify_status(418), ErrorCategory::Unknown);
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350), 0.0);
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(350));
        assert_eq!(policy.base_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1), 0.5);
        for _ in 0..50 {
            let d = policy.delay_for(0);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_transient_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);

        let result = retry_with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(TestError(ErrorCategory::Transient))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_transient_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(2);

        let result: Result<(), _> = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError(ErrorCategory::Transient)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_called_once() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5);

        let result: Result<(), _> = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError(ErrorCategory::Permanent)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(5);

        let _ = retry_with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError(ErrorCategory::Unknown)) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_actionable_message() {
        assert!(ErrorClassifier::actionable_message(Some(403), "x").contains("anti-bot"));
        assert!(ErrorClassifier::actionable_message(Some(503), "x").contains("retry later"));
        assert_eq!(ErrorClassifier::actionable_message(None, "fallback"), "fallback");
    }
}
