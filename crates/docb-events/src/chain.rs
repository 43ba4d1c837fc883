//! Running build stages as a chain of bus events.
//!
//! Each request event runs one stage against a shared [`BuildContext`]; on
//! success the handler publishes the next request itself:
//!
//! ```text
//! build.requested    -> PrepareOutput    -> clone.requested
//! clone.requested    -> CloneRepos       -> discover.requested
//! discover.requested -> DiscoverDocs     -> transform.requested
//! transform.requested -> TransformContent -> generate.requested
//! generate.requested -> GenerateSite     -> build.completed
//! ```
//!
//! Stage failures are retried per the chain's [`RetryPolicy`]. An event that
//! still fails is dead-lettered and a `build.failed` event is published.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use docb_pipeline::stages::{
    CLONE_REPOS, DISCOVER_DOCS, GENERATE_SITE, PREPARE_OUTPUT, TRANSFORM_CONTENT,
};
use docb_pipeline::{BuildContext, Stage, StageError, StageFlow, StageRegistry};

use crate::bus::{EventBus, Handler};
use crate::dlq::DeadLetterQueue;
use crate::error::{EventError, EventResult};
use crate::event::{names, Event};
use crate::retry::{with_retry, RetryPolicy};

/// One build's state, shared by every stage handler of that build.
pub type SharedContext = Arc<Mutex<BuildContext>>;

/// Builds the event that follows a stage which asked to continue.
pub type NextEvent = fn(&BuildContext) -> Option<Event>;

/// Request event and stage, in chain order.
pub const STAGE_EVENTS: [(&str, &str); 5] = [
    (names::BUILD_REQUESTED, PREPARE_OUTPUT),
    (names::CLONE_REQUESTED, CLONE_REPOS),
    (names::DISCOVER_REQUESTED, DISCOVER_DOCS),
    (names::TRANSFORM_REQUESTED, TRANSFORM_CONTENT),
    (names::GENERATE_REQUESTED, GENERATE_SITE),
];

fn clone_requested(ctx: &BuildContext) -> Option<Event> {
    Some(Event::CloneRequested {
        build_id: ctx.build_id.clone(),
        repositories: ctx.repos.clone(),
    })
}

fn discover_requested(ctx: &BuildContext) -> Option<Event> {
    Some(Event::DiscoverRequested {
        build_id: ctx.build_id.clone(),
        repositories: ctx.repo_names(),
    })
}

fn transform_requested(ctx: &BuildContext) -> Option<Event> {
    Some(Event::TransformRequested {
        build_id: ctx.build_id.clone(),
    })
}

fn generate_requested(ctx: &BuildContext) -> Option<Event> {
    Some(Event::GenerateRequested {
        build_id: ctx.build_id.clone(),
    })
}

/// `build.completed` once a site exists, fresh or reused.
fn build_completed(ctx: &BuildContext) -> Option<Event> {
    ctx.output_path.clone().map(|output_path| Event::BuildCompleted {
        build_id: ctx.build_id.clone(),
        output_path,
        cached: ctx.is_cached(),
    })
}

/// The event a built-in stage publishes when it continues.
pub fn next_event_for(stage: &str) -> Option<NextEvent> {
    let next: NextEvent = match stage {
        PREPARE_OUTPUT => clone_requested,
        CLONE_REPOS => discover_requested,
        DISCOVER_DOCS => transform_requested,
        TRANSFORM_CONTENT => generate_requested,
        GENERATE_SITE => build_completed,
        _ => return None,
    };
    Some(next)
}

/// Turn `stage` into a bus handler for one build.
///
/// Events for other builds are ignored. The stage runs under `policy`; when
/// it gives up the event lands in `dlq`, `build.failed` is published, and
/// the error is returned. A requested skip ends the chain, publishing
/// `build.completed` only when the skip left a site behind (a whole-build
/// cache hit). Failures further down the chain are reported by their own
/// handlers and do not fail this one.
pub fn stage_handler(
    stage: Arc<dyn Stage>,
    ctx: SharedContext,
    bus: Weak<EventBus>,
    next: NextEvent,
    policy: RetryPolicy,
    dlq: Arc<DeadLetterQueue>,
) -> Handler {
    Arc::new(move |event: &Event| -> EventResult<()> {
        let build_id = ctx.lock()?.build_id.clone();
        if event.build_id() != Some(&build_id) {
            debug!(event = %event, build = %build_id, "event belongs to another build");
            return Ok(());
        }
        let bus = bus
            .upgrade()
            .ok_or_else(|| EventError::permanent("event bus was dropped"))?;

        let flow: Arc<Mutex<Option<StageFlow>>> = Arc::new(Mutex::new(None));
        let attempt = {
            let (stage, ctx, flow) = (stage.clone(), ctx.clone(), flow.clone());
            with_retry(
                move |_| {
                    let mut ctx = ctx.lock()?;
                    if ctx.cancel.is_canceled() {
                        return Err(StageError::Canceled.into());
                    }
                    let outcome = stage.run(&mut ctx)?;
                    *flow.lock()? = Some(outcome);
                    Ok(())
                },
                policy.clone(),
                dlq.clone(),
            )
        };

        if let Err(e) = attempt(event) {
            let failed = Event::BuildFailed {
                build_id,
                stage: stage.name().to_string(),
                error: e.to_string(),
            };
            if let Err(report) = bus.publish(&failed) {
                warn!(event = %failed, error = %report, "build.failed handler failed");
            }
            return Err(e);
        }

        let outcome = flow.lock()?.take();
        let following = match outcome {
            Some(StageFlow::Continue) => next(&*ctx.lock()?),
            Some(StageFlow::Skip { reason }) => {
                info!(build = %build_id, stage = stage.name(), %reason, "build chain stopped");
                build_completed(&*ctx.lock()?)
            }
            None => None,
        };
        if let Some(following) = following {
            if let Err(e) = bus.publish(&following) {
                warn!(event = %following, error = %e, "downstream handler failed");
            }
        }
        Ok(())
    })
}

/// Subscribes the built-in stages of one build to a bus.
pub struct StageChain {
    ctx: SharedContext,
    policy: RetryPolicy,
    dlq: Arc<DeadLetterQueue>,
}

impl StageChain {
    pub fn new(ctx: BuildContext, policy: RetryPolicy, dlq: Arc<DeadLetterQueue>) -> Self {
        Self {
            ctx: Arc::new(Mutex::new(ctx)),
            policy,
            dlq,
        }
    }

    pub fn context(&self) -> SharedContext {
        self.ctx.clone()
    }

    /// One handler per entry of [`STAGE_EVENTS`], taken from `registry`.
    pub fn register(&self, bus: &Arc<EventBus>, registry: &StageRegistry) -> EventResult<()> {
        for (trigger, name) in STAGE_EVENTS {
            let stage = registry
                .get(name)
                .cloned()
                .ok_or_else(|| EventError::Validation(format!("stage {name} is not registered")))?;
            let next = next_event_for(name)
                .ok_or_else(|| EventError::Validation(format!("stage {name} has no successor")))?;
            bus.subscribe_arc(
                trigger,
                stage_handler(
                    stage,
                    self.ctx.clone(),
                    Arc::downgrade(bus),
                    next,
                    self.policy.clone(),
                    self.dlq.clone(),
                ),
            )?;
        }
        Ok(())
    }

    /// The request that starts this build.
    pub fn request(&self) -> EventResult<Event> {
        let ctx = self.ctx.lock()?;
        Ok(Event::BuildRequested {
            build_id: ctx.build_id.clone(),
            repositories: ctx.repos.clone(),
        })
    }
}
