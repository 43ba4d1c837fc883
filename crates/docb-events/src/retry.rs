use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::Handler;
use crate::dlq::{DeadLetterQueue, FailedEvent};
use crate::error::{EventError, EventResult};
use crate::event::Event;

/// Serializable retry parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 100,
        }
    }
}

/// Decides whether an error is worth another attempt.
pub type RetryClassifier = Arc<dyn Fn(&EventError) -> bool + Send + Sync>;

/// How a wrapped handler retries.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    classifier: RetryClassifier,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            classifier: Arc::new(EventError::is_transient),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }

    /// Replace the transient-only classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&EventError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, error: &EventError) -> bool {
        (self.classifier)(error)
    }

    /// Attempts actually made; zero is treated as one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait before attempt `attempt + 1`, given that `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Wrap `handler` so failures are retried per `policy`.
///
/// When attempts run out, or an error is not retryable, the event is put on
/// `dlq` and [`EventError::RetryExhausted`] is returned.
pub fn with_retry<F>(handler: F, policy: RetryPolicy, dlq: Arc<DeadLetterQueue>) -> Handler
where
    F: Fn(&Event) -> EventResult<()> + Send + Sync + 'static,
{
    Arc::new(move |event: &Event| -> EventResult<()> {
        let max = policy.attempts();
        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;
            let err = match handler(event) {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(event = %event, attempt, "handler succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };
            if !policy.is_retryable(&err) {
                warn!(event = %event, attempt, error = %err, "non-retryable handler error");
                break err;
            }
            if attempt >= max {
                break err;
            }
            let delay = policy.delay_for(attempt);
            debug!(
                event = %event,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying handler"
            );
            thread::sleep(delay);
        };

        dlq.enqueue(FailedEvent {
            event: event.clone(),
            error: last_error.to_string(),
            timestamp: Utc::now(),
            attempts: attempt,
        })?;
        Err(EventError::RetryExhausted {
            event: event.name().to_string(),
            attempts: attempt,
            last_error: Box::new(last_error),
        })
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use docb_types::BuildId;

    fn event() -> Event {
        Event::CloneRequested {
            build_id: BuildId::new("b1"),
            repositories: Vec::new(),
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    fn flaky(
        calls: Arc<AtomicU32>,
        failures: u32,
        error: fn() -> EventError,
    ) -> impl Fn(&Event) -> EventResult<()> + Send + Sync + 'static {
        move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                Err(error())
            } else {
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Policy
    // -----------------------------------------------------------------------

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_millis(100));
        assert!(policy.is_retryable(&EventError::transient("x")));
        assert!(!policy.is_retryable(&EventError::permanent("x")));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(fast(0).attempts(), 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_ms, 100);
    }

    // -----------------------------------------------------------------------
    // Wrapper
    // -----------------------------------------------------------------------

    #[test]
    fn retry_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let dlq = Arc::new(DeadLetterQueue::new());
        let handler = with_retry(
            flaky(calls.clone(), 1, || EventError::transient("blip")),
            fast(3),
            dlq.clone(),
        );

        assert!(handler(&event()).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dlq.count().unwrap(), 0);
    }

    #[test]
    fn exhaustion_dead_letters_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let dlq = Arc::new(DeadLetterQueue::new());
        let handler = with_retry(
            flaky(calls.clone(), u32::MAX, || EventError::transient("down")),
            fast(3),
            dlq.clone(),
        );

        let err = handler(&event()).unwrap_err();
        assert!(matches!(
            err,
            EventError::RetryExhausted { attempts: 3, ref event, .. } if event == "clone.requested"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let entries = dlq.get_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 3);
        assert_eq!(entries[0].error, "transient error: down");
        assert_eq!(entries[0].event, event());
    }

    #[test]
    fn non_retryable_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let dlq = Arc::new(DeadLetterQueue::new());
        let handler = with_retry(
            flaky(calls.clone(), u32::MAX, || EventError::Validation("bad repo".into())),
            fast(5),
            dlq.clone(),
        );

        assert!(handler(&event()).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dlq.count().unwrap(), 1);
    }

    #[test]
    fn custom_classifier_is_used() {
        let calls = Arc::new(AtomicU32::new(0));
        let dlq = Arc::new(DeadLetterQueue::new());
        let policy = fast(3).with_classifier(|_| true);
        let handler = with_retry(
            flaky(calls.clone(), 2, || EventError::permanent("retry me anyway")),
            policy,
            dlq.clone(),
        );

        assert!(handler(&event()).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn wrapped_handler_on_bus_dead_letters() {
        use crate::bus::EventBus;
        use crate::event::names;

        let dlq = Arc::new(DeadLetterQueue::new());
        let bus = EventBus::new();
        bus.subscribe_arc(
            names::CLONE_REQUESTED,
            with_retry(|_| Err(EventError::transient("no network")), fast(2), dlq.clone()),
        )
        .unwrap();

        assert!(matches!(
            bus.publish(&event()),
            Err(EventError::RetryExhausted { attempts: 2, .. })
        ));
        assert_eq!(dlq.count().unwrap(), 1);
    }
}
