use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::BuildContext;
use crate::error::{PipelineError, PipelineResult, StageError};
use crate::middleware::{invoke, Middleware};
use crate::plan::ExecutionPlan;
use crate::registry::StageRegistry;
use crate::stage::{StageFlow, StageOutcome, StageReport};

/// Executor policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Abort the run on the first failed stage. When `false`, every planned
    /// stage is attempted.
    pub stop_on_error: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stop_on_error: true,
        }
    }
}

/// Lifecycle of one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Executing,
    Completed,
    Failed,
    Canceled,
    Skipped,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Planning | Self::Executing)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Aggregate outcome of one pipeline invocation.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionResult {
    /// Every stage that was attempted (or marked canceled), by name.
    pub executed_stages: BTreeMap<String, StageReport>,
    pub plan: ExecutionPlan,
    pub canceled: bool,
    /// A stage requested that the rest of the run be skipped.
    pub skipped: bool,
    pub state: RunState,
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// No stage failed and the run was not canceled. A requested skip counts
    /// as success.
    pub fn is_success(&self) -> bool {
        matches!(self.state, RunState::Completed | RunState::Skipped)
    }

    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.executed_stages.get(stage).map(|r| &r.outcome)
    }

    /// Stages that failed or were canceled, in plan order.
    pub fn failed_stages(&self) -> Vec<&str> {
        self.in_plan_order(StageOutcome::is_failure)
    }

    /// Stages that succeeded or requested a skip, in plan order.
    pub fn succeeded_stages(&self) -> Vec<&str> {
        self.in_plan_order(StageOutcome::is_success)
    }

    /// Planned stages that never ran.
    pub fn pending_stages(&self) -> Vec<&str> {
        self.plan
            .order
            .iter()
            .filter(|s| !self.executed_stages.contains_key(*s))
            .map(String::as_str)
            .collect()
    }

    /// Turn a canceled or failed run into an error.
    pub fn into_result(self) -> PipelineResult<Self> {
        for stage in &self.plan.order {
            match self.outcome(stage) {
                Some(StageOutcome::Canceled) => {
                    return Err(PipelineError::Canceled {
                        stage: stage.clone(),
                    })
                }
                Some(StageOutcome::Failed { error }) => {
                    return Err(PipelineError::StageFailed {
                        stage: stage.clone(),
                        message: error.clone(),
                    })
                }
                _ => {}
            }
        }
        Ok(self)
    }

    fn in_plan_order(&self, keep: fn(&StageOutcome) -> bool) -> Vec<&str> {
        self.plan
            .order
            .iter()
            .filter(|s| self.outcome(s).is_some_and(keep))
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Plans and runs stages from a [`StageRegistry`].
///
/// Stages run strictly one after another on the calling thread. Separate
/// executors (or separate calls on one executor) may run concurrently as long
/// as each has its own [`BuildContext`].
pub struct PipelineExecutor {
    registry: Arc<StageRegistry>,
    middleware: Vec<Arc<dyn Middleware>>,
    config: ExecutorConfig,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<StageRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            middleware: Vec::new(),
            config,
        }
    }

    /// Append a middleware. The first one added is the outermost.
    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn plan<S: AsRef<str>>(&self, requested: &[S]) -> PipelineResult<ExecutionPlan> {
        ExecutionPlan::build(&self.registry, requested)
    }

    /// Plan `requested` and run the plan against `ctx`.
    ///
    /// Planning errors are returned as `Err` and nothing runs. Once planning
    /// succeeds the run always yields an [`ExecutionResult`]; use
    /// [`ExecutionResult::into_result`] to treat failure or cancellation as an
    /// error.
    pub fn execute<S: AsRef<str>>(
        &self,
        requested: &[S],
        ctx: &mut BuildContext,
    ) -> PipelineResult<ExecutionResult> {
        let started = Instant::now();
        let plan = self.plan(requested)?;
        info!(build = %ctx.build_id, stages = plan.len(), "pipeline starting");

        let mut executed = BTreeMap::new();
        let mut canceled = false;
        let mut skipped = false;
        let mut failed = false;

        for name in &plan.order {
            if ctx.cancel.is_canceled() {
                warn!(build = %ctx.build_id, stage = %name, "canceled before stage");
                executed.insert(
                    name.clone(),
                    StageReport {
                        outcome: StageOutcome::Canceled,
                        elapsed: Duration::ZERO,
                    },
                );
                canceled = true;
                break;
            }

            let Some(stage) = self.registry.get(name) else {
                // The plan was built from this registry.
                return Err(PipelineError::UnknownStage {
                    stage: name.clone(),
                    required_by: None,
                });
            };

            let stage_start = Instant::now();
            let result = invoke(&self.middleware, stage.as_ref(), ctx);
            let elapsed = stage_start.elapsed();

            let outcome = match result {
                Ok(StageFlow::Continue) => StageOutcome::Succeeded,
                Ok(StageFlow::Skip { reason }) => StageOutcome::SkipRequested { reason },
                Err(StageError::Canceled) => StageOutcome::Canceled,
                Err(e) => StageOutcome::Failed {
                    error: e.to_string(),
                },
            };
            let stop = match &outcome {
                StageOutcome::Succeeded => false,
                StageOutcome::SkipRequested { .. } => {
                    skipped = true;
                    true
                }
                StageOutcome::Canceled => {
                    canceled = true;
                    true
                }
                StageOutcome::Failed { .. } => {
                    failed = true;
                    self.config.stop_on_error
                }
            };
            executed.insert(name.clone(), StageReport { outcome, elapsed });
            if stop {
                break;
            }
        }

        let state = if canceled {
            RunState::Canceled
        } else if failed {
            RunState::Failed
        } else if skipped {
            RunState::Skipped
        } else {
            RunState::Completed
        };

        let result = ExecutionResult {
            executed_stages: executed,
            plan,
            canceled,
            skipped,
            state,
            elapsed: started.elapsed(),
        };
        info!(
            build = %ctx.build_id,
            state = %result.state,
            executed = result.executed_stages.len(),
            failed = result.failed_stages().len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "pipeline finished"
        );
        Ok(result)
    }
}
