//! # prview
//!
//! `prview diff` prints the working tree's diff as JSON; `prview watch`
//! streams `{"type":"refresh"}` lines on stdout whenever it changes.
//! Logs go to stderr and follow `RUST_LOG`.

mod cli;
mod commands;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use prview_git::GitCli;
use prview_live::LiveDiffService;
use tracing_subscriber::prelude::*;

use crate::cli::{Cli, Command};

/// How long exit waits for blocking tasks, such as a pending stdin read.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "warn,prview=info,prview_git=info,prview_watcher=info,prview_live=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.watch_config()?;
    let runner = Arc::new(GitCli::with_program(config.git_program.clone()));
    let service = LiveDiffService::new(&cli.dir, config, runner);
    let repo = cli.repo.as_deref();

    match &cli.command {
        Command::Diff(args) => commands::diff(&service, repo, args).await,
        Command::Watch(args) => commands::watch(service, repo, args).await,
    }
}
