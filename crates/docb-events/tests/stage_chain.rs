//! The built-in stages driven through the event bus.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docb_cache::{DocFile, RepoHash};
use docb_events::{names, DeadLetterQueue, Event, EventBus, RetryPolicy, StageChain};
use docb_pipeline::{
    BuildContext, BuildServices, BuildSettings, ContentTransform, DocDiscovery, RepoConfig,
    RepoFetcher, SiteGenerator, StageError, StageRegistry,
};
use docb_store::{InMemoryObjectStore, ObjectStore};
use docb_types::BuildId;

// =============================================================================
// Fixture collaborators
// =============================================================================

/// Fails `resolve` with a collaborator error until its budget runs out.
struct FlakyFetcher {
    failures_left: AtomicUsize,
    resolves: AtomicUsize,
}

impl FlakyFetcher {
    fn new(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            resolves: AtomicUsize::new(0),
        }
    }

    fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

impl RepoFetcher for FlakyFetcher {
    fn resolve(&self, repo: &RepoConfig) -> Result<RepoHash, StageError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(StageError::collaborator("fetcher", "connection reset"));
        }
        Ok(RepoHash::new(&repo.name, "main", format!("content-{}", repo.name)))
    }

    fn fetch(&self, repo: &RepoConfig, _dest: &Path) -> Result<PathBuf, StageError> {
        Ok(PathBuf::from(&repo.url))
    }
}

struct SingleDoc;

impl DocDiscovery for SingleDoc {
    fn discover(&self, repo: &RepoConfig, _root: &Path) -> Result<Vec<DocFile>, StageError> {
        Ok(vec![DocFile::new(&repo.name, "docs/index.md", 5)])
    }
}

struct Upper;

impl ContentTransform for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn apply(&self, repo: &RepoConfig, _root: &Path, _docs: &[DocFile]) -> Result<Vec<u8>, StageError> {
        Ok(repo.name.to_uppercase().into_bytes())
    }
}

struct DirGenerator;

impl SiteGenerator for DirGenerator {
    fn generate(&self, _ctx: &BuildContext, output: &Path) -> Result<(), StageError> {
        fs::create_dir_all(output).map_err(|e| StageError::io(output, e))?;
        let index = output.join("index.md");
        fs::write(&index, "# site").map_err(|e| StageError::io(index, e))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    fetcher: Arc<FlakyFetcher>,
    registry: StageRegistry,
    bus: Arc<EventBus>,
    dlq: Arc<DeadLetterQueue>,
    outcomes: Arc<Mutex<Vec<Event>>>,
}

impl Harness {
    fn new(fetch_failures: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        fs::create_dir_all(root.join("src/alpha")).unwrap();

        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let fetcher = Arc::new(FlakyFetcher::new(fetch_failures));
        let registry = StageRegistry::with_default_stages(BuildServices {
            store,
            fetcher: fetcher.clone(),
            discovery: Arc::new(SingleDoc),
            transforms: vec![Arc::new(Upper)],
            generator: Arc::new(DirGenerator),
        });

        let bus = Arc::new(EventBus::new());
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        for name in [names::BUILD_COMPLETED, names::BUILD_FAILED] {
            let seen = outcomes.clone();
            bus.subscribe(name, move |event| {
                seen.lock().unwrap().push(event.clone());
                Ok(())
            })
            .unwrap();
        }

        Self {
            _tmp: tmp,
            root,
            fetcher,
            registry,
            bus,
            dlq: Arc::new(DeadLetterQueue::new()),
            outcomes,
        }
    }

    fn repos(&self) -> Vec<RepoConfig> {
        vec![RepoConfig::new("alpha", self.root.join("src/alpha").display().to_string())]
    }

    /// Register a chain for `build` and publish its request.
    fn start(&self, build: &str, repos: Vec<RepoConfig>) -> StageChain {
        let settings = BuildSettings {
            transforms: vec!["upper".into()],
            output_dir: self.root.join("public"),
            work_dir: self.root.join("work"),
            ..Default::default()
        };
        let ctx = BuildContext::new(BuildId::new(build), settings, repos);
        let chain = StageChain::new(
            ctx,
            RetryPolicy::new(3, Duration::from_millis(1)),
            self.dlq.clone(),
        );
        chain.register(&self.bus, &self.registry).unwrap();
        self.bus.publish(&chain.request().unwrap()).unwrap();
        chain
    }

    fn outcomes(&self) -> Vec<Event> {
        self.outcomes.lock().unwrap().clone()
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn transient_fetch_failure_is_retried() {
    let h = Harness::new(1);
    let chain = h.start("b1", h.repos());

    assert_eq!(h.fetcher.resolves(), 2);
    assert_eq!(h.dlq.count().unwrap(), 0);
    let output = h.root.join("public/b1");
    assert_eq!(
        h.outcomes(),
        vec![Event::BuildCompleted {
            build_id: BuildId::new("b1"),
            output_path: output.clone(),
            cached: false,
        }]
    );
    assert!(output.join("index.md").exists());
    assert_eq!(chain.context().lock().unwrap().doc_count(), 1);
}

#[test]
fn persistent_fetch_failure_is_dead_lettered() {
    let h = Harness::new(usize::MAX);
    let chain = h.start("b1", h.repos());

    assert_eq!(h.fetcher.resolves(), 3);
    let parked = h.dlq.get_all().unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].event.name(), names::CLONE_REQUESTED);
    assert_eq!(parked[0].attempts, 3);

    match h.outcomes().as_slice() {
        [Event::BuildFailed { build_id, stage, error }] => {
            assert_eq!(build_id.as_str(), "b1");
            assert_eq!(stage, "CloneRepos");
            assert!(error.contains("failed after 3 attempt(s)"));
        }
        other => panic!("unexpected outcomes: {other:?}"),
    }
    assert!(chain.context().lock().unwrap().output_path.is_none());
}

#[test]
fn replaying_the_dead_letter_finishes_the_build() {
    let h = Harness::new(3);
    h.start("b1", h.repos());
    assert_eq!(h.dlq.count().unwrap(), 1);

    assert_eq!(h.dlq.replay(&h.bus).unwrap(), 1);
    assert_eq!(h.dlq.count().unwrap(), 0);
    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].name(), names::BUILD_FAILED);
    assert!(matches!(
        &outcomes[1],
        Event::BuildCompleted { cached: false, .. }
    ));
}

#[test]
fn identical_rebuild_completes_from_cache() {
    let h = Harness::new(0);
    h.start("b1", h.repos());
    h.start("b2", h.repos());

    let outcomes = h.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[1],
        Event::BuildCompleted {
            build_id: BuildId::new("b2"),
            output_path: h.root.join("public/b1"),
            cached: true,
        }
    );
}

#[test]
fn no_repositories_ends_the_chain_without_failure() {
    let h = Harness::new(0);
    let chain = h.start("empty", Vec::new());

    assert!(h.outcomes().is_empty());
    assert_eq!(h.dlq.count().unwrap(), 0);
    assert_eq!(h.fetcher.resolves(), 0);
    assert!(chain.context().lock().unwrap().output_path.is_none());
}
