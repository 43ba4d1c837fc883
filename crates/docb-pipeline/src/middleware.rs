//! Cross-cutting wrappers around stage invocation.
//!
//! Middleware form an ordered chain: the first registered is the outermost
//! and sees the stage's result last.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info_span, warn};

use crate::context::BuildContext;
use crate::error::StageError;
use crate::metrics::Metrics;
use crate::stage::{Stage, StageFlow};

/// The rest of the chain, ending in the stage itself.
pub type Next<'a> = &'a dyn Fn(&mut BuildContext) -> Result<StageFlow, StageError>;

pub trait Middleware: Send + Sync {
    fn handle(
        &self,
        stage: &str,
        ctx: &mut BuildContext,
        next: Next<'_>,
    ) -> Result<StageFlow, StageError>;
}

/// Run `stage` through `chain`, outermost first.
pub(crate) fn invoke(
    chain: &[Arc<dyn Middleware>],
    stage: &dyn Stage,
    ctx: &mut BuildContext,
) -> Result<StageFlow, StageError> {
    match chain.split_first() {
        None => stage.run(ctx),
        Some((outer, rest)) => {
            outer.handle(stage.name(), ctx, &|ctx: &mut BuildContext| invoke(rest, stage, ctx))
        }
    }
}

fn outcome_label(result: &Result<StageFlow, StageError>) -> &'static str {
    match result {
        Ok(StageFlow::Continue) => "succeeded",
        Ok(StageFlow::Skip { .. }) => "skipped",
        Err(StageError::Canceled) => "canceled",
        Err(_) => "failed",
    }
}

// ---------------------------------------------------------------------------
// TracingMiddleware
// ---------------------------------------------------------------------------

/// Opens a span per stage and logs how it ended.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn handle(
        &self,
        stage: &str,
        ctx: &mut BuildContext,
        next: Next<'_>,
    ) -> Result<StageFlow, StageError> {
        let span = info_span!("stage", stage, build = %ctx.build_id);
        let _guard = span.enter();
        let start = Instant::now();
        debug!("stage starting");

        let result = next(ctx);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(StageFlow::Continue) => debug!(elapsed_ms, "stage succeeded"),
            Ok(StageFlow::Skip { reason }) => debug!(elapsed_ms, reason = %reason, "stage requested skip"),
            Err(e) => warn!(elapsed_ms, error = %e, "stage failed"),
        }
        result
    }
}

// ---------------------------------------------------------------------------
// MetricsMiddleware
// ---------------------------------------------------------------------------

/// Counts outcomes and records durations.
///
/// Emits `stage.<name>.<outcome>` counters and a `stage.<name>.duration_ms`
/// histogram.
pub struct MetricsMiddleware {
    metrics: Arc<dyn Metrics>,
}

impl MetricsMiddleware {
    pub fn new(metrics: Arc<dyn Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for MetricsMiddleware {
    fn handle(
        &self,
        stage: &str,
        ctx: &mut BuildContext,
        next: Next<'_>,
    ) -> Result<StageFlow, StageError> {
        let start = Instant::now();
        let result = next(ctx);
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .increment_counter(&format!("stage.{stage}.{}", outcome_label(&result)));
        self.metrics
            .record_histogram(&format!("stage.{stage}.duration_ms"), elapsed);
        result
    }
}
