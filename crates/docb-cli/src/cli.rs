use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "docb",
    about = "docb: incremental documentation builds over a content-addressed cache",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise the default log level to debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project configuration file
    #[arg(short, long, global = true, default_value = "docb.toml")]
    pub config: PathBuf,

    /// Object store directory (overrides the configuration file)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List stored objects
    Ls(LsArgs),
    /// Show one object's type, size, and metadata
    Show(ShowArgs),
    /// List builds, or the objects one build references
    Refs(RefsArgs),
    /// Remove objects no build references
    Gc(GcArgs),
    /// Keep the N most recent builds and collect the rest
    Prune(PruneArgs),
    /// Print the execution plan for the given stages
    Plan(PlanArgs),
    /// Report what a build of the configured repositories would reuse
    Check(CheckArgs),
    /// Build the configured repositories
    Build(BuildArgs),
    /// Show the recorded event log
    Events(EventsArgs),
}

#[derive(Args)]
pub struct LsArgs {
    /// Only objects of this type (repo-tree, docs-manifest, ...)
    #[arg(long = "type")]
    pub object_type: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Full hash or a unique hex prefix
    pub hash: String,
}

#[derive(Args)]
pub struct RefsArgs {
    pub build_id: Option<String>,
}

#[derive(Args)]
pub struct GcArgs {
    /// Report what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct PruneArgs {
    #[arg(long)]
    pub keep: usize,
}

#[derive(Args)]
pub struct PlanArgs {
    #[arg(required = true)]
    pub stages: Vec<String>,
}

#[derive(Args)]
pub struct CheckArgs {}

#[derive(Args)]
pub struct BuildArgs {
    /// Build id to record (defaults to a fresh UUID v7)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct EventsArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ls() {
        let cli = Cli::try_parse_from(["docb", "ls"]).unwrap();
        if let Command::Ls(args) = cli.command {
            assert_eq!(args.object_type, None);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_ls_type_filter() {
        let cli = Cli::try_parse_from(["docb", "ls", "--type", "repo-tree"]).unwrap();
        if let Command::Ls(args) = cli.command {
            assert_eq!(args.object_type, Some("repo-tree".into()));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_show() {
        let cli = Cli::try_parse_from(["docb", "show", "ab12"]).unwrap();
        if let Command::Show(args) = cli.command {
            assert_eq!(args.hash, "ab12");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_show_requires_hash() {
        assert!(Cli::try_parse_from(["docb", "show"]).is_err());
    }

    #[test]
    fn parse_refs_with_and_without_build() {
        let cli = Cli::try_parse_from(["docb", "refs"]).unwrap();
        assert!(matches!(cli.command, Command::Refs(RefsArgs { build_id: None })));

        let cli = Cli::try_parse_from(["docb", "refs", "b1"]).unwrap();
        if let Command::Refs(args) = cli.command {
            assert_eq!(args.build_id, Some("b1".into()));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_gc_dry_run() {
        let cli = Cli::try_parse_from(["docb", "gc", "--dry-run"]).unwrap();
        if let Command::Gc(args) = cli.command {
            assert!(args.dry_run);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_prune() {
        let cli = Cli::try_parse_from(["docb", "prune", "--keep", "3"]).unwrap();
        if let Command::Prune(args) = cli.command {
            assert_eq!(args.keep, 3);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_prune_requires_keep() {
        assert!(Cli::try_parse_from(["docb", "prune"]).is_err());
    }

    #[test]
    fn parse_plan_stages() {
        let cli = Cli::try_parse_from(["docb", "plan", "DiscoverDocs", "GenerateSite"]).unwrap();
        if let Command::Plan(args) = cli.command {
            assert_eq!(args.stages, vec!["DiscoverDocs", "GenerateSite"]);
        } else { panic!("wrong command"); }
        assert!(Cli::try_parse_from(["docb", "plan"]).is_err());
    }

    #[test]
    fn parse_check() {
        let cli = Cli::try_parse_from(["docb", "check"]).unwrap();
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn parse_build_id() {
        let cli = Cli::try_parse_from(["docb", "build", "--id", "nightly"]).unwrap();
        if let Command::Build(args) = cli.command {
            assert_eq!(args.id, Some("nightly".into()));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_events_limit() {
        let cli = Cli::try_parse_from(["docb", "events"]).unwrap();
        if let Command::Events(args) = cli.command {
            assert_eq!(args.limit, 20);
        } else { panic!("wrong command"); }

        let cli = Cli::try_parse_from(["docb", "events", "-n", "5"]).unwrap();
        if let Command::Events(args) = cli.command {
            assert_eq!(args.limit, 5);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "docb", "ls", "-v", "-c", "site/docb.toml", "--store", "/tmp/store", "--format", "json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("site/docb.toml"));
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/store")));
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["docb", "check"]).unwrap();
        assert!(!cli.verbose);
        assert_eq!(cli.config, PathBuf::from("docb.toml"));
        assert_eq!(cli.store, None);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parse_unknown_command_fails() {
        assert!(Cli::try_parse_from(["docb", "deploy"]).is_err());
    }
}
