use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;

use docb_cache::{BuildCache, StageCache};
use docb_events::{Event, EventBus, FileEventLog};
use docb_pipeline::stages::GENERATE_SITE;
use docb_pipeline::{
    BuildContext, ExecutionPlan, ExecutionResult, PipelineExecutor, RepoFetcher, RunState,
    StageOutcome, StageRegistry, TracingMiddleware,
};
use docb_store::{FileObjectStore, FileStoreConfig, InMemoryObjectStore, ObjectStore};
use docb_types::{BuildId, ObjectHash, ObjectType};

use crate::cli::*;
use crate::config::DocbConfig;
use crate::local::{local_services, LocalFetcher};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = match cli.command {
        Command::Check(_) | Command::Build(_) => DocbConfig::load(&cli.config)?,
        _ => DocbConfig::load_or_default(&cli.config)?,
    };
    if let Some(store) = cli.store {
        config.store.path = store;
    }
    let format = cli.format;

    match cli.command {
        Command::Ls(args) => cmd_ls(&config, format, args),
        Command::Show(args) => cmd_show(&config, format, args),
        Command::Refs(args) => cmd_refs(&config, format, args),
        Command::Gc(args) => cmd_gc(&config, format, args),
        Command::Prune(args) => cmd_prune(&config, format, args),
        Command::Plan(args) => cmd_plan(format, args),
        Command::Check(_) => cmd_check(&config, format),
        Command::Build(args) => cmd_build(&config, format, args),
        Command::Events(args) => cmd_events(&config, format, args),
    }
}

fn open_store(config: &DocbConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store = FileObjectStore::open(
        &config.store.path,
        FileStoreConfig {
            sync_writes: config.store.sync_writes,
        },
    )
    .with_context(|| format!("opening store {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accept a full hash or a unique prefix of one.
fn resolve_hash(store: &dyn ObjectStore, input: &str) -> anyhow::Result<ObjectHash> {
    if input.len() == 64 {
        return Ok(ObjectHash::from_hex(input)?);
    }
    let prefix = input.to_ascii_lowercase();
    let matches: Vec<ObjectHash> = store
        .list(None)?
        .into_iter()
        .filter(|h| h.to_hex().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [hash] => Ok(*hash),
        [] => bail!("no object matches {input}"),
        _ => bail!("{input} is ambiguous ({} objects match)", matches.len()),
    }
}

fn cmd_ls(config: &DocbConfig, format: OutputFormat, args: LsArgs) -> anyhow::Result<()> {
    let filter = args
        .object_type
        .as_deref()
        .map(str::parse::<ObjectType>)
        .transpose()?;
    let store = open_store(config)?;
    let hashes = store.list(filter)?;

    if format == OutputFormat::Json {
        return print_json(&hashes);
    }
    for hash in &hashes {
        let object = store.get(hash)?;
        println!(
            "{}  {:<20} {:>10}",
            hash.to_hex().yellow(),
            object.object_type.to_string().cyan(),
            object.size
        );
    }
    if hashes.is_empty() {
        println!("No objects.");
    }
    Ok(())
}

fn cmd_show(config: &DocbConfig, format: OutputFormat, args: ShowArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let hash = resolve_hash(store.as_ref(), &args.hash)?;
    let object = store.get(&hash)?;

    if format == OutputFormat::Json {
        #[derive(Serialize)]
        struct View<'a> {
            hash: ObjectHash,
            object_type: ObjectType,
            size: u64,
            metadata: &'a docb_types::ObjectMetadata,
        }
        return print_json(&View {
            hash,
            object_type: object.object_type,
            size: object.size,
            metadata: &object.metadata,
        });
    }

    println!("Object {}", hash.to_hex().yellow().bold());
    println!("  Type: {}", object.object_type.to_string().cyan());
    println!("  Size: {} bytes", object.size);
    println!("  References: {}", object.metadata.ref_count);
    println!("  Created: {}", object.metadata.created_at.to_rfc3339());
    println!("  Last accessed: {}", object.metadata.last_accessed.to_rfc3339());
    for (key, value) in object.metadata.custom.iter() {
        println!("  {}: {}", key.bold(), serde_json::to_string(value)?);
    }
    Ok(())
}

fn cmd_refs(config: &DocbConfig, format: OutputFormat, args: RefsArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;

    if let Some(id) = args.build_id {
        let hashes = store.get_build_ref(&BuildId::new(id.as_str()))?;
        if format == OutputFormat::Json {
            return print_json(&hashes);
        }
        println!("Build {} references {} object(s)", id.yellow().bold(), hashes.len());
        for hash in &hashes {
            let kind = store
                .try_get(hash)?
                .map(|o| o.object_type.to_string())
                .unwrap_or_else(|| "missing".to_string());
            println!("  {}  {}", hash.to_hex().yellow(), kind.cyan());
        }
        return Ok(());
    }

    let builds = BuildCache::new(store.clone()).list_builds()?;
    if format == OutputFormat::Json {
        return print_json(&builds);
    }
    let ids = store.build_ids()?;
    if ids.is_empty() {
        println!("No builds recorded.");
        return Ok(());
    }
    for id in &ids {
        let refs = store.get_build_ref(id)?.len();
        match builds.iter().find(|b| &b.build_id == id) {
            Some(build) => println!(
                "{}  {}  {} refs  {}",
                id.as_str().yellow().bold(),
                build.created_at.format("%Y-%m-%d %H:%M:%S"),
                refs,
                build.output_path.display()
            ),
            None => println!("{}  {} refs  {}", id.as_str().yellow(), refs, "(no manifest)".dimmed()),
        }
    }
    Ok(())
}

fn cmd_gc(config: &DocbConfig, format: OutputFormat, args: GcArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;

    if args.dry_run {
        let live = store.root_set()?;
        let candidates = store.gc_candidates(&live)?;
        if format == OutputFormat::Json {
            return print_json(&candidates);
        }
        println!(
            "GC dry run: {} live, {} would be removed.",
            live.len(),
            candidates.len().to_string().bold()
        );
        for hash in &candidates {
            println!("  {}", hash.to_hex().yellow());
        }
        return Ok(());
    }

    let report = store.collect_garbage()?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("{} GC: {report}", "✓".green());
    Ok(())
}

fn cmd_prune(config: &DocbConfig, format: OutputFormat, args: PruneArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let report = BuildCache::new(store).prune_builds(args.keep)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!(
        "{} Kept {} build(s). GC: {report}",
        "✓".green(),
        args.keep.to_string().bold()
    );
    Ok(())
}

fn cmd_plan(format: OutputFormat, args: PlanArgs) -> anyhow::Result<()> {
    let registry = StageRegistry::with_default_stages(local_services(Arc::new(
        InMemoryObjectStore::new(),
    )));
    let plan = ExecutionPlan::build(&registry, args.stages.as_slice())?;
    if format == OutputFormat::Json {
        return print_json(&plan);
    }
    for (i, stage) in plan.order.iter().enumerate() {
        let deps = plan.dependencies(stage);
        if deps.is_empty() {
            println!("{:>2}. {}", i + 1, stage.bold());
        } else {
            println!("{:>2}. {}  {} {}", i + 1, stage.bold(), "after".dimmed(), deps.join(", "));
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RepoCheck {
    repo: String,
    content_hash: String,
    clone: bool,
    discovery: bool,
    transforms: Vec<(String, bool)>,
}

#[derive(Serialize)]
struct CheckReport {
    build_hash: String,
    cached_build: Option<String>,
    output_path: Option<PathBuf>,
    repositories: Vec<RepoCheck>,
}

fn cmd_check(config: &DocbConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stage_cache = StageCache::new(store.clone());
    let mut ctx = BuildContext::new(
        BuildId::new("check"),
        config.build.clone(),
        config.repos.clone(),
    );

    let mut repositories = Vec::new();
    for repo in &config.repos {
        let key = LocalFetcher.resolve(repo)?;
        let hash = key.content_hash.clone();
        let clone = stage_cache
            .can_skip_clone(&repo.name, &hash)?
            .is_some_and(|hit| hit.value.exists());
        let discovery = stage_cache.can_skip_discovery(&repo.name, &hash)?.is_some();
        let mut transforms = Vec::new();
        for name in &config.build.transforms {
            let hit = stage_cache.can_skip_transform(&repo.name, &hash, name)?.is_some();
            transforms.push((name.clone(), hit));
        }
        repositories.push(RepoCheck {
            repo: repo.name.clone(),
            content_hash: hash,
            clone,
            discovery,
            transforms,
        });
        ctx.repo_hashes.insert(repo.name.clone(), key);
    }

    let signature = docb_pipeline::stages::signature_for(&ctx)?;
    let cached = BuildCache::new(store)
        .should_skip_build(&signature)?
        .filter(|c| c.output_path.exists());
    let report = CheckReport {
        build_hash: signature.build_hash.clone(),
        cached_build: cached.as_ref().map(|c| c.build_id.to_string()),
        output_path: cached.as_ref().map(|c| c.output_path.clone()),
        repositories,
    };

    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("Build signature {}", signature.short_hash().yellow().bold());
    match &cached {
        Some(build) => println!(
            "  {} reuse build {} at {}",
            "skip".green().bold(),
            build.build_id.as_str().yellow(),
            build.output_path.display()
        ),
        None => println!("  {} no cached build matches", "build".red().bold()),
    }
    for repo in &report.repositories {
        let short = repo.content_hash.get(..12).unwrap_or(&repo.content_hash);
        println!("{} ({})", repo.repo.bold(), short.dimmed());
        println!("  clone      {}", mark(repo.clone));
        println!("  discovery  {}", mark(repo.discovery));
        for (name, hit) in &repo.transforms {
            println!("  {:<10} {}", name, mark(*hit));
        }
    }
    Ok(())
}

fn mark(hit: bool) -> colored::ColoredString {
    if hit {
        "cached".green()
    } else {
        "stale".red()
    }
}

fn cmd_build(config: &DocbConfig, format: OutputFormat, args: BuildArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let log = FileEventLog::open(config.event_log_path())?
        .with_sync_writes(config.store.sync_writes);
    let bus = EventBus::new().with_log(Arc::new(log));

    let build_id = args.id.map(BuildId::new).unwrap_or_else(BuildId::generate);
    bus.publish(&Event::BuildRequested {
        build_id: build_id.clone(),
        repositories: config.repos.clone(),
    })?;

    let registry = StageRegistry::with_default_stages(local_services(store));
    let executor = PipelineExecutor::new(Arc::new(registry), config.executor.clone())
        .with_middleware(TracingMiddleware);
    let mut ctx = BuildContext::new(build_id.clone(), config.build.clone(), config.repos.clone());
    let result = executor.execute(&[GENERATE_SITE], &mut ctx)?;

    let event = match result.state {
        RunState::Completed | RunState::Skipped => {
            ctx.output_path.clone().map(|output_path| Event::BuildCompleted {
                build_id: build_id.clone(),
                output_path,
                cached: ctx.is_cached(),
            })
        }
        _ => {
            let (stage, error) = result
                .failed_stages()
                .first()
                .map(|s| {
                    let error = result.outcome(s).map(|o| o.to_string()).unwrap_or_default();
                    (s.to_string(), error)
                })
                .unwrap_or_else(|| (GENERATE_SITE.to_string(), result.state.to_string()));
            Some(Event::BuildFailed {
                build_id: build_id.clone(),
                stage,
                error,
            })
        }
    };
    if let Some(event) = &event {
        bus.publish(event)?;
    }

    if format == OutputFormat::Json {
        print_json(&result)?;
    } else {
        for stage in &result.plan.order {
            match result.executed_stages.get(stage) {
                Some(report) => println!(
                    "  {:<18} {:<12} {:>6} ms",
                    stage,
                    report.outcome.label(),
                    report.elapsed.as_millis()
                ),
                None => println!("  {:<18} {}", stage, "pending".dimmed()),
            }
        }
    }

    match event {
        Some(Event::BuildFailed { stage, error, .. }) => {
            bail!("build {} failed in {stage}: {error}", build_id.short_id())
        }
        Some(Event::BuildCompleted { output_path, cached, .. }) => {
            if format == OutputFormat::Text {
                let how = if cached { "reused" } else { "built" };
                println!(
                    "{} Build {} {} at {} ({} hits, {} misses)",
                    "✓".green().bold(),
                    build_id.short_id().yellow(),
                    how,
                    output_path.display(),
                    ctx.cache.hits,
                    ctx.cache.misses
                );
            }
            Ok(())
        }
        _ => {
            if format == OutputFormat::Text {
                println!(
                    "{} Build {} skipped: {}",
                    "-".yellow().bold(),
                    build_id.short_id().yellow(),
                    skip_reason(&result)
                );
            }
            Ok(())
        }
    }
}

/// Why a run that produced no site stopped early.
fn skip_reason(result: &ExecutionResult) -> String {
    result
        .plan
        .order
        .iter()
        .find_map(|stage| match result.outcome(stage) {
            Some(StageOutcome::SkipRequested { reason }) => Some(reason.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "nothing to build".to_string())
}

fn cmd_events(config: &DocbConfig, format: OutputFormat, args: EventsArgs) -> anyhow::Result<()> {
    let path = config.event_log_path();
    if !path.exists() {
        println!("No events recorded.");
        return Ok(());
    }
    let records = FileEventLog::open(&path)?.recover()?;
    let start = records.len().saturating_sub(args.limit);
    let recent = &records[start..];

    if format == OutputFormat::Json {
        let events: Vec<serde_json::Value> = recent
            .iter()
            .map(|r| serde_json::from_slice(&r.payload))
            .collect::<Result<_, _>>()?;
        return print_json(&events);
    }
    for record in recent {
        let build = record
            .build_id
            .as_ref()
            .map(|b| b.short_id().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<24} {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.event_type.cyan(),
            build.yellow()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use docb_pipeline::RepoConfig;
    use docb_types::Object;

    fn project(root: &Path, repos: Vec<RepoConfig>) -> DocbConfig {
        let mut config = DocbConfig::default();
        config.store.path = root.join("store");
        config.build.output_dir = root.join("public");
        config.build.work_dir = root.join("work");
        config.build.transforms = vec!["toc".into()];
        config.repos = repos;
        config
    }

    fn local_repo(root: &Path) -> RepoConfig {
        let repo = root.join("engine");
        fs::create_dir_all(repo.join("docs")).unwrap();
        fs::write(repo.join("docs/index.md"), "# Engine").unwrap();
        RepoConfig::new("engine", repo.display().to_string()).with_doc_paths(["docs"])
    }

    fn build(config: &DocbConfig, id: &str) -> anyhow::Result<()> {
        cmd_build(
            config,
            OutputFormat::Text,
            BuildArgs {
                id: Some(id.to_string()),
            },
        )
    }

    fn logged_events(config: &DocbConfig) -> Vec<String> {
        FileEventLog::open(config.event_log_path())
            .unwrap()
            .recover()
            .unwrap()
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }

    #[test]
    fn build_writes_site_and_records_completion() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), vec![local_repo(dir.path())]);

        build(&config, "b1").unwrap();
        let site = dir.path().join("public/b1");
        assert!(site.join("engine/docs/index.md").exists());
        assert!(site.join("engine/_toc.md").exists());
        assert_eq!(logged_events(&config), vec!["build.requested", "build.completed"]);
        assert_eq!(open_store(&config).unwrap().build_ids().unwrap().len(), 1);
    }

    #[test]
    fn build_without_repositories_is_skipped_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), Vec::new());

        build(&config, "empty").unwrap();
        assert_eq!(logged_events(&config), vec!["build.requested"]);
        assert!(!dir.path().join("public/empty").exists());
    }

    #[test]
    fn identical_rebuild_reuses_site() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), vec![local_repo(dir.path())]);

        build(&config, "b1").unwrap();
        build(&config, "b2").unwrap();
        assert!(!dir.path().join("public/b2").exists());

        let records = FileEventLog::open(config.event_log_path())
            .unwrap()
            .recover()
            .unwrap();
        let last: Event = serde_json::from_slice(&records[3].payload).unwrap();
        assert_eq!(
            last,
            Event::BuildCompleted {
                build_id: BuildId::new("b2"),
                output_path: dir.path().join("public/b1"),
                cached: true,
            }
        );
    }

    #[test]
    fn missing_checkout_fails_and_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = RepoConfig::new("ghost", dir.path().join("nope").display().to_string());
        let config = project(dir.path(), vec![ghost]);

        let err = build(&config, "b1").unwrap_err();
        assert!(err.to_string().contains("failed in CloneRepos"));
        assert_eq!(logged_events(&config), vec!["build.requested", "build.failed"]);
    }

    #[test]
    fn hash_prefix_must_be_unique() {
        let dir = tempfile::tempdir().unwrap();
        let config = project(dir.path(), Vec::new());
        let store = open_store(&config).unwrap();
        let a = store.put(&Object::new(ObjectType::RepoTree, b"a".to_vec())).unwrap();
        let b = store.put(&Object::new(ObjectType::RepoTree, b"b".to_vec())).unwrap();

        assert_eq!(resolve_hash(store.as_ref(), &a.to_hex()).unwrap(), a);
        assert_eq!(resolve_hash(store.as_ref(), &b.to_hex()[..16]).unwrap(), b);
        assert!(resolve_hash(store.as_ref(), "").is_err());
        assert!(resolve_hash(store.as_ref(), "zz").is_err());
    }
}
