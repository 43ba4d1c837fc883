use std::path::PathBuf;

use docb_cache::CacheError;

/// Errors that abort a pipeline invocation as a whole.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A requested stage, or a dependency of one, is not registered.
    #[error("unknown stage '{stage}'{}", .required_by.as_ref().map(|r| format!(" (required by '{r}')")).unwrap_or_default())]
    UnknownStage {
        stage: String,
        required_by: Option<String>,
    },

    /// The dependency graph has a cycle; nothing was executed.
    #[error("dependency cycle among stages: {}", .stages.join(", "))]
    CycleDetected { stages: Vec<String> },

    /// Two stages registered under one name.
    #[error("stage '{0}' is already registered")]
    DuplicateStage(String),

    /// The run was canceled before or during `stage`.
    #[error("pipeline canceled at stage '{stage}'")]
    Canceled { stage: String },

    /// A stage failed.
    #[error("stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors returned by a single stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An external collaborator (fetcher, discovery, transform, generator,
    /// enqueuer) reported a failure.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build context is missing something an earlier stage should have
    /// produced, or carries malformed settings.
    #[error("validation error: {0}")]
    Validation(String),

    /// The stage noticed cancellation part-way through.
    #[error("canceled")]
    Canceled,
}

impl StageError {
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
