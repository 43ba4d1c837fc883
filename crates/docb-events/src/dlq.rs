use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::EventResult;
use crate::event::Event;

/// An event the retry wrapper gave up on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    pub event: Event,
    /// Display form of the last error.
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
}

/// Ordered quarantine for events that exhausted their retries.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: RwLock<Vec<FailedEvent>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, failed: FailedEvent) -> EventResult<()> {
        warn!(
            event = %failed.event,
            attempts = failed.attempts,
            error = %failed.error,
            "event moved to dead-letter queue"
        );
        self.entries.write()?.push(failed);
        Ok(())
    }

    /// Copy of every entry, oldest first.
    pub fn get_all(&self) -> EventResult<Vec<FailedEvent>> {
        Ok(self.entries.read()?.clone())
    }

    pub fn clear(&self) -> EventResult<()> {
        self.entries.write()?.clear();
        Ok(())
    }

    pub fn count(&self) -> EventResult<usize> {
        Ok(self.entries.read()?.len())
    }

    /// Republish every entry through `bus`, oldest first.
    ///
    /// Entries that publish cleanly are dropped. Failures stay queued in
    /// their original order, ahead of anything enqueued meanwhile, unless a
    /// retry-wrapped handler already re-enqueued them during the publish.
    /// Returns the number of entries that succeeded.
    pub fn replay(&self, bus: &EventBus) -> EventResult<usize> {
        let pending = std::mem::take(&mut *self.entries.write()?);
        let total = pending.len();
        let mut kept = Vec::new();
        let mut replayed = 0;

        for failed in pending {
            let before = self.count()?;
            match bus.publish(&failed.event) {
                Ok(()) => {
                    debug!(event = %failed.event, "replayed dead-lettered event");
                    replayed += 1;
                }
                Err(e) if self.count()? > before => {
                    debug!(event = %failed.event, error = %e, "replay failed; re-queued by handler");
                }
                Err(e) => {
                    debug!(event = %failed.event, error = %e, "replay failed");
                    kept.push(FailedEvent {
                        error: e.to_string(),
                        timestamp: Utc::now(),
                        ..failed
                    });
                }
            }
        }

        if !kept.is_empty() {
            let mut entries = self.entries.write()?;
            kept.append(&mut entries);
            *entries = kept;
        }
        info!(total, replayed, "dead-letter replay complete");
        Ok(replayed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::error::EventError;
    use crate::event::names;
    use docb_types::BuildId;

    fn failed(id: &str) -> FailedEvent {
        FailedEvent {
            event: Event::GenerateRequested {
                build_id: BuildId::new(id),
            },
            error: "transient error: host down".into(),
            timestamp: Utc::now(),
            attempts: 3,
        }
    }

    #[test]
    fn enqueue_preserves_order() {
        let dlq = DeadLetterQueue::new();
        for id in ["b1", "b2", "b3"] {
            dlq.enqueue(failed(id)).unwrap();
        }
        let ids: Vec<_> = dlq
            .get_all()
            .unwrap()
            .iter()
            .filter_map(|f| f.event.build_id().map(|b| b.to_string()))
            .collect();
        assert_eq!(ids, vec!["b1", "b2", "b3"]);
        assert_eq!(dlq.count().unwrap(), 3);
    }

    #[test]
    fn get_all_is_a_copy() {
        let dlq = DeadLetterQueue::new();
        dlq.enqueue(failed("b1")).unwrap();
        let mut copy = dlq.get_all().unwrap();
        copy.clear();
        assert_eq!(dlq.count().unwrap(), 1);
    }

    #[test]
    fn clear_empties_queue() {
        let dlq = DeadLetterQueue::new();
        dlq.enqueue(failed("b1")).unwrap();
        dlq.clear().unwrap();
        assert_eq!(dlq.count().unwrap(), 0);
    }

    #[test]
    fn replay_drops_successes_and_keeps_failures() {
        let dlq = DeadLetterQueue::new();
        for id in ["ok-1", "bad", "ok-2"] {
            dlq.enqueue(failed(id)).unwrap();
        }
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.subscribe(names::GENERATE_REQUESTED, move |event| {
            c.fetch_add(1, Ordering::SeqCst);
            match event.build_id() {
                Some(id) if id.as_str() == "bad" => Err(EventError::permanent("still broken")),
                _ => Ok(()),
            }
        })
        .unwrap();

        assert_eq!(dlq.replay(&bus).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let left = dlq.get_all().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].event.build_id().unwrap().as_str(), "bad");
        assert_eq!(left[0].error, "permanent error: still broken");
    }

    #[test]
    fn replay_without_subscribers_clears_queue() {
        let dlq = DeadLetterQueue::new();
        dlq.enqueue(failed("b1")).unwrap();
        assert_eq!(dlq.replay(&EventBus::new()).unwrap(), 1);
        assert_eq!(dlq.count().unwrap(), 0);
    }
}
