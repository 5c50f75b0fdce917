//! Retry with exponential backoff
//!
//! Transient failures are retried up to `max_attempts` total attempts,
//! sleeping `base_delay * factor^i` between them. No jitter, no cap.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionProvider, ProviderError};
use crate::error::{RelayError, Result};
use crate::session::Turn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Wait after failed attempt `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt as u32);
        self.base_delay.saturating_mul(factor)
    }
}

/// Bookkeeping for one failed attempt, logged before the wait
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt_index: usize,
    pub last_error: ProviderError,
    /// `None` on the final attempt
    pub next_delay: Option<Duration>,
}

/// Provider wrapper applying a [`RetryPolicy`]
#[derive(Clone)]
pub struct ResilientClient {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Complete a conversation window.
    ///
    /// Empty completions resolve to the fixed "empty" text and are never
    /// retried. Permanent errors return after a single attempt.
    pub async fn complete(&self, turns: &[Turn]) -> Result<String> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match self.provider.complete(turns).await {
                Ok(completion) => {
                    debug!("{} answered on attempt {}", self.provider.name(), attempt + 1);
                    return Ok(completion.into_text());
                }
                Err(e) => e,
            };

            if !err.is_retriable() {
                return Err(RelayError::Provider(err));
            }

            let record = RetryAttempt {
                attempt_index: attempt,
                next_delay: (attempt + 1 < max).then(|| self.policy.delay_for_attempt(attempt)),
                last_error: err,
            };

            let Some(delay) = record.next_delay else {
                return Err(RelayError::MaxRetriesExceeded {
                    attempts: max,
                    last: record.last_error,
                });
            };

            warn!(
                "Retrying {} after {:?} (attempt {}/{}) due to: {}",
                self.provider.name(),
                delay,
                record.attempt_index + 1,
                max,
                record.last_error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Single-turn convenience call
    pub async fn prompt(&self, text: &str) -> Result<String> {
        self.complete(&[Turn::user(text)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Provider that replays a fixed script of outcomes
    struct Scripted {
        outcomes: Mutex<VecDeque<std::result::Result<Completion, ProviderError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(outcomes: Vec<std::result::Result<Completion, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _turns: &[Turn]) -> std::result::Result<Completion, ProviderError> {
            *self.calls.lock() += 1;
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::permanent("script exhausted")))
        }
    }

    fn overloaded() -> std::result::Result<Completion, ProviderError> {
        Err(ProviderError::from_status(503, "model overloaded"))
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_transient_failures_then_success_waits_seven_seconds() {
        let provider = Scripted::new(vec![
            overloaded(),
            overloaded(),
            overloaded(),
            Ok(Completion::Text("finally".into())),
        ]);
        let client = ResilientClient::new(provider.clone(), RetryPolicy::default());

        let start = Instant::now();
        let text = client.prompt("hi").await.unwrap();

        assert_eq!(text, "finally");
        assert_eq!(provider.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_single_attempt() {
        let provider = Scripted::new(vec![Err(ProviderError::from_status(400, "bad request"))]);
        let client = ResilientClient::new(provider.clone(), RetryPolicy::default());

        let start = Instant::now();
        let err = client.prompt("hi").await.unwrap_err();

        assert!(matches!(err, RelayError::Provider(_)));
        assert_eq!(provider.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let provider = Scripted::new(vec![
            overloaded(),
            overloaded(),
            overloaded(),
            Err(ProviderError::transient("deadline timeout")),
        ]);
        let client = ResilientClient::new(provider.clone(), RetryPolicy::default());

        let start = Instant::now();
        let err = client.prompt("hi").await.unwrap_err();

        match err {
            RelayError::MaxRetriesExceeded { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.detail, "deadline timeout");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(provider.calls(), 4);
        // No sleep after the final attempt
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_completion_is_success() {
        let provider = Scripted::new(vec![Ok(Completion::Empty)]);
        let client = ResilientClient::new(provider.clone(), RetryPolicy::default());

        assert_eq!(client.prompt("hi").await.unwrap(), "AI response is empty");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_after_transient_stops() {
        let provider = Scripted::new(vec![overloaded(), Err(ProviderError::permanent("invalid key"))]);
        let client = ResilientClient::new(provider.clone(), RetryPolicy::default());

        let start = Instant::now();
        assert!(client.prompt("hi").await.is_err());
        assert_eq!(provider.calls(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }
}
