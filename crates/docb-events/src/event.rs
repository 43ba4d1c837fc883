use std::fmt;
use std::path::PathBuf;

use docb_pipeline::{DiscoveryResult, RepoConfig};
use docb_types::BuildId;
use serde::{Deserialize, Serialize};

/// Stable event names, used as subscription keys.
pub mod names {
    pub const BUILD_REQUESTED: &str = "build.requested";
    pub const CLONE_REQUESTED: &str = "clone.requested";
    pub const DISCOVER_REQUESTED: &str = "discover.requested";
    pub const TRANSFORM_REQUESTED: &str = "transform.requested";
    pub const GENERATE_REQUESTED: &str = "generate.requested";
    pub const BUILD_COMPLETED: &str = "build.completed";
    pub const BUILD_FAILED: &str = "build.failed";
    pub const REPOSITORIES_DISCOVERED: &str = "repositories.discovered";
}

/// Everything that travels over the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    BuildRequested {
        build_id: BuildId,
        repositories: Vec<RepoConfig>,
    },
    CloneRequested {
        build_id: BuildId,
        repositories: Vec<RepoConfig>,
    },
    DiscoverRequested {
        build_id: BuildId,
        repositories: Vec<String>,
    },
    TransformRequested {
        build_id: BuildId,
    },
    GenerateRequested {
        build_id: BuildId,
    },
    BuildCompleted {
        build_id: BuildId,
        output_path: PathBuf,
        /// The site was reused from an earlier identical build.
        cached: bool,
    },
    BuildFailed {
        build_id: BuildId,
        stage: String,
        error: String,
    },
    RepositoriesDiscovered {
        /// Source host the sweep ran against.
        forge: String,
        result: DiscoveryResult,
    },
}

impl Event {
    /// The name handlers subscribe to.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BuildRequested { .. } => names::BUILD_REQUESTED,
            Self::CloneRequested { .. } => names::CLONE_REQUESTED,
            Self::DiscoverRequested { .. } => names::DISCOVER_REQUESTED,
            Self::TransformRequested { .. } => names::TRANSFORM_REQUESTED,
            Self::GenerateRequested { .. } => names::GENERATE_REQUESTED,
            Self::BuildCompleted { .. } => names::BUILD_COMPLETED,
            Self::BuildFailed { .. } => names::BUILD_FAILED,
            Self::RepositoriesDiscovered { .. } => names::REPOSITORIES_DISCOVERED,
        }
    }

    /// The build this event belongs to, if any.
    pub fn build_id(&self) -> Option<&BuildId> {
        match self {
            Self::BuildRequested { build_id, .. }
            | Self::CloneRequested { build_id, .. }
            | Self::DiscoverRequested { build_id, .. }
            | Self::TransformRequested { build_id }
            | Self::GenerateRequested { build_id }
            | Self::BuildCompleted { build_id, .. }
            | Self::BuildFailed { build_id, .. } => Some(build_id),
            Self::RepositoriesDiscovered { .. } => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.build_id() {
            Some(id) => write!(f, "{} ({})", self.name(), id.short_id()),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let id = BuildId::new("b-123456789");
        assert_eq!(
            Event::CloneRequested {
                build_id: id.clone(),
                repositories: Vec::new()
            }
            .name(),
            "clone.requested"
        );
        assert_eq!(
            Event::GenerateRequested { build_id: id }.name(),
            "generate.requested"
        );
    }

    #[test]
    fn display_includes_short_build_id() {
        let event = Event::TransformRequested {
            build_id: BuildId::new("0123456789abcdef"),
        };
        assert_eq!(event.to_string(), "transform.requested (01234567)");
    }

    #[test]
    fn json_is_tagged() {
        let event = Event::BuildFailed {
            build_id: BuildId::new("b1"),
            stage: "CloneRepos".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "build_failed");
        assert_eq!(json["build_id"], "b1");
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
