//! Dependency-ordered stage execution for the docb build engine.
//!
//! A build is a set of named [`Stage`]s with static dependency lists. For
//! each invocation the [`PipelineExecutor`] resolves the requested stages and
//! their dependencies into an [`ExecutionPlan`] (a deterministic topological
//! order), then runs the plan one stage at a time through a chain of
//! [`Middleware`].
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use docb_pipeline::{
//!     BuildContext, BuildSettings, ExecutorConfig, FnStage, PipelineExecutor, StageFlow,
//!     StageRegistry,
//! };
//! use docb_types::BuildId;
//!
//! let mut registry = StageRegistry::new();
//! registry.register(FnStage::new("fetch", |_| Ok(StageFlow::Continue))).unwrap();
//! registry
//!     .register(FnStage::new("render", |_| Ok(StageFlow::Continue)).depends_on(["fetch"]))
//!     .unwrap();
//!
//! let executor = PipelineExecutor::new(Arc::new(registry), ExecutorConfig::default());
//! let mut ctx = BuildContext::new(BuildId::new("demo"), BuildSettings::default(), Vec::new());
//! let result = executor.execute(&["render"], &mut ctx).unwrap();
//! assert_eq!(result.plan.order, vec!["fetch", "render"]);
//! assert!(result.is_success());
//! ```

pub mod cancel;
pub mod collab;
pub mod context;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod middleware;
pub mod plan;
pub mod registry;
pub mod stage;
pub mod stages;

pub use cancel::CancellationToken;
pub use collab::{
    BuildEnqueuer, BuildJob, ContentTransform, DiscoveredRepo, DiscoveryResult, DocDiscovery,
    RepoConfig, RepoFetcher, RepositoryDiscovery, SiteGenerator,
};
pub use context::{BuildContext, BuildSettings, CacheCounters};
pub use error::{PipelineError, PipelineResult, StageError};
pub use executor::{ExecutionResult, ExecutorConfig, PipelineExecutor, RunState};
pub use metrics::{Metrics, MetricsRegistry, MetricsSnapshot, NoopMetrics};
pub use middleware::{Middleware, MetricsMiddleware, Next, TracingMiddleware};
pub use plan::ExecutionPlan;
pub use registry::StageRegistry;
pub use stage::{FnStage, Stage, StageFlow, StageOutcome, StageReport};
pub use stages::{BuildServices, DEFAULT_STAGES};
