use std::io;
use std::sync::PoisonError;

use docb_pipeline::StageError;

/// Errors produced by handlers, the bus, the retry wrapper, and the event log.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A failure worth retrying (network blip, busy host, ...).
    #[error("transient error: {0}")]
    Transient(String),

    /// A failure that will not go away by retrying.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Malformed input. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The retry wrapper gave up and quarantined the event.
    #[error("event '{event}' failed after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        event: String,
        attempts: u32,
        #[source]
        last_error: Box<EventError>,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl EventError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Whether the default retry policy retries this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl<T> From<PoisonError<T>> for EventError {
    fn from(e: PoisonError<T>) -> Self {
        Self::LockPoisoned(e.to_string())
    }
}

/// Collaborator and I/O failures are treated as transient; bad input and
/// cancellation are not.
impl From<StageError> for EventError {
    fn from(e: StageError) -> Self {
        match e {
            StageError::Validation(msg) => Self::Validation(msg),
            StageError::Canceled => Self::Permanent("canceled".into()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Result alias for event operations.
pub type EventResult<T> = Result<T, EventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_transient() {
        assert!(EventError::transient("x").is_transient());
        assert!(!EventError::permanent("x").is_transient());
        assert!(!EventError::Validation("x".into()).is_transient());
    }

    #[test]
    fn stage_errors_are_classified() {
        assert!(EventError::from(StageError::collaborator("fetcher", "timeout")).is_transient());
        assert!(matches!(
            EventError::from(StageError::validation("bad")),
            EventError::Validation(_)
        ));
        assert!(!EventError::from(StageError::Canceled).is_transient());
    }

    #[test]
    fn exhausted_error_chains_source() {
        use std::error::Error;
        let err = EventError::RetryExhausted {
            event: "clone.requested".into(),
            attempts: 3,
            last_error: Box::new(EventError::transient("host down")),
        };
        assert_eq!(
            err.to_string(),
            "event 'clone.requested' failed after 3 attempt(s): transient error: host down"
        );
        assert!(err.source().is_some());
    }
}
