use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::log::EventLog;

/// A subscriber callback. Handlers may publish or subscribe re-entrantly.
pub type Handler = Arc<dyn Fn(&Event) -> EventResult<()> + Send + Sync>;

/// Synchronous, in-process publish/subscribe router.
///
/// Handlers for one event name run in registration order on the publishing
/// thread; the first error stops delivery for that publish call.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    log: Option<Arc<dyn EventLog>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist every published event to `log` before delivery.
    pub fn with_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Register `handler` for events named `event_name`.
    pub fn subscribe<F>(&self, event_name: impl Into<String>, handler: F) -> EventResult<()>
    where
        F: Fn(&Event) -> EventResult<()> + Send + Sync + 'static,
    {
        self.subscribe_arc(event_name, Arc::new(handler))
    }

    pub fn subscribe_arc(&self, event_name: impl Into<String>, handler: Handler) -> EventResult<()> {
        let event_name = event_name.into();
        debug!(event = %event_name, "subscribing handler");
        self.handlers
            .write()?
            .entry(event_name)
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Deliver `event` to its subscribers.
    ///
    /// Log failures are reported and otherwise ignored. An event nobody
    /// subscribed to is not an error.
    pub fn publish(&self, event: &Event) -> EventResult<()> {
        self.record(event);

        // Snapshot so handlers run without the registry lock held.
        let handlers: Vec<Handler> = match self.handlers.read()?.get(event.name()) {
            Some(list) => list.clone(),
            None => {
                debug!(event = %event, "no subscribers");
                return Ok(());
            }
        };

        debug!(event = %event, handlers = handlers.len(), "publishing");
        for (index, handler) in handlers.iter().enumerate() {
            if let Err(e) = handler(event) {
                warn!(event = %event, handler = index, error = %e, "handler failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Number of handlers registered for `event_name`.
    pub fn subscriber_count(&self, event_name: &str) -> EventResult<usize> {
        Ok(self.handlers.read()?.get(event_name).map_or(0, Vec::len))
    }

    fn record(&self, event: &Event) {
        let Some(log) = &self.log else {
            return;
        };
        let result = serde_json::to_vec(event)
            .map_err(|e| EventError::Serialization(e.to_string()))
            .and_then(|payload| {
                let mut metadata = BTreeMap::new();
                metadata.insert("event".to_string(), event.name().to_string());
                log.append(event.build_id(), event.name(), &payload, &metadata)
            });
        if let Err(e) = result {
            warn!(event = %event, error = %e, "event log append failed");
        }
    }
}
