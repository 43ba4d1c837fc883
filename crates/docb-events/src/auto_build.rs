use std::sync::Arc;

use tracing::{debug, info};

use docb_pipeline::{BuildEnqueuer, BuildJob, CancellationToken, RepositoryDiscovery};

use crate::bus::EventBus;
use crate::error::EventResult;
use crate::event::{names, Event};

/// Trigger recorded on jobs this handler enqueues.
pub const DISCOVERY_TRIGGER: &str = "discovery";

/// Turns repository discovery sweeps into build jobs.
pub struct AutoBuildHandler {
    discovery: Arc<dyn RepositoryDiscovery>,
    enqueuer: Arc<dyn BuildEnqueuer>,
}

impl AutoBuildHandler {
    pub fn new(discovery: Arc<dyn RepositoryDiscovery>, enqueuer: Arc<dyn BuildEnqueuer>) -> Self {
        Self {
            discovery,
            enqueuer,
        }
    }

    /// Enqueue one build covering every repository in a
    /// [`Event::RepositoriesDiscovered`]. Other events are ignored.
    pub fn handle(&self, event: &Event) -> EventResult<()> {
        let Event::RepositoriesDiscovered { forge, result } = event else {
            return Ok(());
        };
        if result.repositories.is_empty() {
            debug!(forge = %forge, filtered = result.filtered.len(), "no repositories discovered");
            return Ok(());
        }

        let repositories = self.discovery.to_repo_configs(&result.repositories, forge);
        let job = BuildJob::new(repositories, DISCOVERY_TRIGGER);
        info!(
            forge = %forge,
            build = %job.id,
            repos = job.repositories.len(),
            "enqueueing discovered build"
        );
        self.enqueuer.enqueue(job)?;
        Ok(())
    }

    /// Subscribe to discovery results on `bus`.
    pub fn register(self: Arc<Self>, bus: &EventBus) -> EventResult<()> {
        bus.subscribe(names::REPOSITORIES_DISCOVERED, move |event| self.handle(event))
    }

    /// Run a discovery sweep and publish its result.
    pub fn discover_and_publish(
        &self,
        bus: &EventBus,
        forge: &str,
        cancel: &CancellationToken,
    ) -> EventResult<()> {
        let result = self.discovery.discover_all(cancel)?;
        debug!(
            forge,
            found = result.repositories.len(),
            errors = result.errors.len(),
            "discovery sweep finished"
        );
        bus.publish(&Event::RepositoriesDiscovered {
            forge: forge.to_string(),
            result,
        })
    }
}
