//! Event-driven plumbing for the docb build engine.
//!
//! - [`EventBus`]: synchronous publish/subscribe keyed by [`Event::name`].
//!   Handlers for one name run in registration order; the first error stops
//!   delivery. Handlers may publish the next event themselves, which is how
//!   stages are chained (`clone.requested` -> `discover.requested` -> ...).
//! - [`with_retry`]: wraps a handler with exponential backoff and parks
//!   events that still fail in a [`DeadLetterQueue`].
//! - [`StageChain`]: runs the built-in stages as such a chain, each stage
//!   retried under one policy and dead-lettered when it keeps failing.
//! - [`FileEventLog`]: optional append-only record of everything published,
//!   framed with a length prefix and CRC32 so torn tails are detected.
//! - [`AutoBuildHandler`]: enqueues builds for discovered repositories.
//!
//! ```rust
//! use std::sync::Arc;
//! use docb_events::{names, with_retry, DeadLetterQueue, Event, EventBus, EventError, RetryPolicy};
//! use docb_types::BuildId;
//!
//! let bus = EventBus::new();
//! let dlq = Arc::new(DeadLetterQueue::new());
//! bus.subscribe_arc(
//!     names::GENERATE_REQUESTED,
//!     with_retry(|_| Err(EventError::permanent("no generator")), RetryPolicy::default(), dlq.clone()),
//! )
//! .unwrap();
//!
//! let event = Event::GenerateRequested { build_id: BuildId::new("b1") };
//! assert!(bus.publish(&event).is_err());
//! assert_eq!(dlq.count().unwrap(), 1);
//! ```

pub mod auto_build;
pub mod bus;
pub mod chain;
pub mod dlq;
pub mod error;
pub mod event;
pub mod log;
pub mod retry;

pub use auto_build::{AutoBuildHandler, DISCOVERY_TRIGGER};
pub use bus::{EventBus, Handler};
pub use chain::{next_event_for, stage_handler, NextEvent, SharedContext, StageChain, STAGE_EVENTS};
pub use dlq::{DeadLetterQueue, FailedEvent};
pub use error::{EventError, EventResult};
pub use event::{names, Event};
pub use log::{EventLog, EventRecord, FileEventLog};
pub use retry::{with_retry, RetryClassifier, RetryConfig, RetryPolicy};
