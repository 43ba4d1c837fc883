use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::context::BuildContext;
use crate::error::StageError;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// What a successful stage asks the executor to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageFlow {
    /// Proceed to the next stage.
    Continue,
    /// Stop the run without treating it as an error.
    Skip { reason: String },
}

impl StageFlow {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }
}

/// A named unit of build work with a static dependency list.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the stages that must run before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError>;
}

type StageFn = dyn Fn(&mut BuildContext) -> Result<StageFlow, StageError> + Send + Sync;

/// A stage backed by a closure.
pub struct FnStage {
    name: String,
    dependencies: Vec<String>,
    run: Box<StageFn>,
}

impl FnStage {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut BuildContext) -> Result<StageFlow, StageError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            run: Box::new(run),
        }
    }

    pub fn depends_on<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError> {
        (self.run)(ctx)
    }
}

impl fmt::Debug for FnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How one stage ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    /// The stage asked for the rest of the run to be skipped.
    SkipRequested { reason: String },
    Failed { error: String },
    /// Cancellation was observed before or during the stage.
    Canceled,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SkipRequested { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Canceled)
    }

    /// Short label, used in logs and metric names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::SkipRequested { .. } => "skipped",
            Self::Failed { .. } => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::SkipRequested { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

/// Outcome and wall-clock time of one executed stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageReport {
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}
