use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use prview_git::DiffTarget;
use prview_watcher::WatchConfig;

/// prview - live git diffs for a working tree
#[derive(Parser, Debug)]
#[command(name = "prview")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML file with watch settings
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Work directory
    #[arg(short = 'C', long = "dir", global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Nested repository below the work directory (e.g. meta/web)
    #[arg(long, global = true, value_name = "NAME")]
    pub repo: Option<String>,

    /// git executable (overrides config)
    #[arg(long, global = true, value_name = "PATH")]
    pub git: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the diff as JSON
    Diff(DiffArgs),

    /// Print a refresh notice as a JSON line whenever the tree changes.
    /// Any input line, or closing stdin, stops it.
    Watch(WatchArgs),
}

#[derive(Args, Debug, Default)]
pub struct DiffArgs {
    /// Staged changes only
    #[arg(long, conflicts_with_all = ["all", "base", "refs"])]
    pub staged: bool,

    /// Staged and unstaged changes against HEAD
    #[arg(long, conflicts_with_all = ["base", "refs"])]
    pub all: bool,

    /// Everything on HEAD since it forked from BRANCH (default branch if omitted)
    #[arg(
        long,
        value_name = "BRANCH",
        num_args = 0..=1,
        default_missing_value = "",
        conflicts_with = "refs"
    )]
    pub base: Option<String>,

    /// Per-file line counts instead of JSON
    #[arg(long)]
    pub summary: bool,

    /// A revision to compare against, or arguments passed to git diff as-is
    #[arg(trailing_var_arg = true)]
    pub refs: Vec<String>,
}

impl DiffArgs {
    pub fn target(&self) -> DiffTarget {
        if self.staged {
            return DiffTarget::Staged;
        }
        if self.all {
            return DiffTarget::Head;
        }
        if let Some(base) = &self.base {
            return DiffTarget::Branch {
                base: Some(base.clone()).filter(|b| !b.is_empty()),
            };
        }
        match self.refs.as_slice() {
            [] => DiffTarget::WorkingTree,
            [name] if !name.starts_with('-') => DiffTarget::Ref { name: name.clone() },
            args => DiffTarget::Args {
                args: args.to_vec(),
            },
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct WatchArgs {
    /// Quiet period before a refresh is sent (overrides config)
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// How long an unused watch is kept (overrides config)
    #[arg(long, value_name = "MS")]
    pub grace_ms: Option<u64>,

    /// Log diff totals to stderr before each refresh
    #[arg(long)]
    pub stats: bool,
}

impl Cli {
    /// Config file values, then command line overrides.
    pub fn watch_config(&self) -> anyhow::Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => WatchConfig::default(),
        };

        if let Some(git) = &self.git {
            config = config.with_git_program(git.clone());
        }
        if let Command::Watch(args) = &self.command {
            if let Some(ms) = args.debounce_ms {
                config = config.with_debounce(Duration::from_millis(ms));
            }
            if let Some(ms) = args.grace_ms {
                config = config.with_grace_period(Duration::from_millis(ms));
            }
        }
        Ok(config)
    }
}
