//! Kiln - hot-reloadable module host.
//!
//! Loads configuration, installs logging, starts the module host and runs a
//! full reload. With `--watch` (or `watch.enabled`), edits to a workspace
//! reload that module. Ctrl-C deactivates every module and exits.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bridge;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use kiln_config::Config;
use kiln_context::HostServices;
use kiln_runtime::{ModuleHost, WorkspaceWatcher, reload_on_change};
use kiln_telemetry::{LogConfig, setup_logging};
use tracing::{info, warn};

/// Kiln - hot-reloadable module host
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file merged over the user configuration
    #[arg(short, long, env = "KILN_CONFIG")]
    config: Option<PathBuf>,

    /// Directory containing module workspaces
    #[arg(short, long)]
    workspaces: Option<PathBuf>,

    /// Reload modules when their sources change
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let mut config = resolved.config;
    if let Some(root) = cli.workspaces {
        config.workspaces.root = root;
    }
    if cli.watch {
        config.watch.enabled = true;
    }

    let log_config = LogConfig::from_section(&config.logging).context("invalid [logging] section")?;
    let _log_guard = setup_logging(&log_config).context("failed to set up logging")?;
    for file in &resolved.loaded_files {
        info!(path = %file, "Loaded configuration file");
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    let root = config.workspaces.root.clone();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create workspaces root {}", root.display()))?;
    info!(
        root = %root.display(),
        build_root = %config.build_root().display(),
        "Starting module host"
    );

    let services = HostServices::new(tokio::runtime::Handle::current());
    let host = ModuleHost::start(
        bridge::host_config(&config),
        Arc::new(bridge::compiler(&config)),
        Arc::new(bridge::loader(&config)),
        services,
    );

    let summary = host.reload_all().await.context("module host stopped")?;
    info!(
        generation = summary.generation,
        queued = summary.queued,
        "Initial load queued"
    );

    let watch_task = if config.watch.enabled {
        let (watcher, events) = WorkspaceWatcher::new(bridge::watcher_config(&config, &root))
            .context("failed to start workspace watcher")?;
        tokio::spawn(watcher.run());
        Some(tokio::spawn(reload_on_change(host.clone(), events)))
    } else {
        None
    };

    host.settle().await.context("module host stopped")?;
    let failures = host.last_failures().await.context("module host stopped")?;
    for failure in &failures {
        warn!(subject = %failure.subject, error = %failure.error, "Module failed to load");
    }
    let active = host.active_modules().await.context("module host stopped")?;
    info!(active = active.len(), failed = failures.len(), "Initial load complete");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");

    if let Some(task) = watch_task {
        task.abort();
    }
    host.shutdown().await.context("module host already stopped")?;
    Ok(())
}
