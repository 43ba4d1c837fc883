//! Dependency resolution and deterministic topological ordering.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::registry::StageRegistry;

/// The stages one invocation will run, in order.
///
/// Built fresh for every invocation and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    /// Every stage in the closure of the request, dependencies first.
    pub order: Vec<String>,
    /// Each stage's direct dependencies, sorted.
    pub graph: BTreeMap<String, Vec<String>>,
}

impl ExecutionPlan {
    /// Resolve `requested` and its transitive dependencies against
    /// `registry`, then order them.
    ///
    /// Ready stages are taken in lexicographic order, and a finished stage
    /// releases its dependents in lexicographic order, so equal inputs always
    /// give equal plans. An unknown stage or a cycle fails the whole plan.
    pub fn build<S: AsRef<str>>(registry: &StageRegistry, requested: &[S]) -> PipelineResult<Self> {
        let graph = resolve(registry, requested)?;

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (stage, deps) in &graph {
            in_degree.insert(stage, deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().insert(stage);
            }
        }

        // BTreeMap iteration seeds the queue in lexicographic order.
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&stage, _)| stage)
            .collect();

        let mut order = Vec::with_capacity(graph.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());
            if let Some(children) = dependents.get(current) {
                for &child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if order.len() < graph.len() {
            let stuck: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(stage, _)| stage.to_string())
                .collect();
            return Err(PipelineError::CycleDetected { stages: stuck });
        }

        debug!(order = ?order, "planned stages");
        Ok(Self { order, graph })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.graph.contains_key(stage)
    }

    pub fn dependencies(&self, stage: &str) -> &[String] {
        self.graph.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Walk the dependency lists from the requested stages outward.
fn resolve<S: AsRef<str>>(
    registry: &StageRegistry,
    requested: &[S],
) -> PipelineResult<BTreeMap<String, Vec<String>>> {
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut pending: Vec<(String, Option<String>)> = requested
        .iter()
        .map(|s| (s.as_ref().to_string(), None))
        .collect();

    while let Some((name, required_by)) = pending.pop() {
        if graph.contains_key(&name) {
            continue;
        }
        let stage = registry
            .get(&name)
            .ok_or_else(|| PipelineError::UnknownStage {
                stage: name.clone(),
                required_by: required_by.clone(),
            })?;
        let mut deps = stage.dependencies();
        deps.sort();
        deps.dedup();
        for dep in &deps {
            if !graph.contains_key(dep) {
                pending.push((dep.clone(), Some(name.clone())));
            }
        }
        graph.insert(name, deps);
    }
    Ok(graph)
}
