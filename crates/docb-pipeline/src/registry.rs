use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::stage::Stage;
use crate::stages::{
    BuildServices, CloneRepos, DiscoverDocs, GenerateSite, PrepareOutput, TransformContent,
};

/// Named stages available to the planner.
#[derive(Default)]
pub struct StageRegistry {
    stages: BTreeMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the five built-in stages:
    /// PrepareOutput -> CloneRepos -> DiscoverDocs -> TransformContent -> GenerateSite
    pub fn with_default_stages(services: BuildServices) -> Self {
        let mut registry = Self::new();
        let stages: [Arc<dyn Stage>; 5] = [
            Arc::new(PrepareOutput),
            Arc::new(CloneRepos::new(&services)),
            Arc::new(DiscoverDocs::new(&services)),
            Arc::new(TransformContent::new(&services)),
            Arc::new(GenerateSite::new(&services)),
        ];
        for stage in stages {
            registry.stages.insert(stage.name().to_string(), stage);
        }
        registry
    }

    /// Add a stage. Names must be unique.
    pub fn register(&mut self, stage: impl Stage + 'static) -> PipelineResult<()> {
        self.register_arc(Arc::new(stage))
    }

    pub fn register_arc(&mut self, stage: Arc<dyn Stage>) -> PipelineResult<()> {
        let name = stage.name().to_string();
        if self.stages.contains_key(&name) {
            return Err(PipelineError::DuplicateStage(name));
        }
        self.stages.insert(name, stage);
        Ok(())
    }

    /// Add or replace a stage.
    pub fn replace(&mut self, stage: impl Stage + 'static) -> Option<Arc<dyn Stage>> {
        let stage: Arc<dyn Stage> = Arc::new(stage);
        self.stages.insert(stage.name().to_string(), stage)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Registered names, ascending.
    pub fn names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FnStage, StageFlow};

    fn noop(name: &str) -> FnStage {
        FnStage::new(name, |_| Ok(StageFlow::Continue))
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = StageRegistry::new();
        reg.register(noop("b")).unwrap();
        reg.register(noop("a")).unwrap();
        assert_eq!(reg.names(), vec!["a", "b"]);
        assert!(reg.contains("a"));
        assert!(reg.get("c").is_none());
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = StageRegistry::new();
        reg.register(noop("a")).unwrap();
        assert!(matches!(
            reg.register(noop("a")),
            Err(PipelineError::DuplicateStage(name)) if name == "a"
        ));
    }

    #[test]
    fn replace_swaps_existing() {
        let mut reg = StageRegistry::new();
        assert!(reg.replace(noop("a")).is_none());
        assert!(reg.replace(noop("a")).is_some());
        assert_eq!(reg.len(), 1);
    }
}
