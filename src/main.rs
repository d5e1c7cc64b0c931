use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use bucketsync::config::SyncConfig;
use bucketsync::sync::engine::{SyncProgress, SyncReport};
use bucketsync::sync::{
    ConflictStrategy, PolicyResolver, SnapshotStore, SyncActionKind, SyncEngine,
};
use bucketsync::sync::throttle::BandwidthLimit;

/// Two-way sync between a local directory and an object storage prefix
#[derive(Parser, Debug)]
#[command(name = "bucketsync")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults to <config dir>/bucketsync/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Classify and print the actions without executing them
    #[arg(long)]
    dry_run: bool,

    /// Override the local directory
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// Override the remote key prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Role to sync as (repeatable); replaces the configured roles
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Conflict strategy: last-write-wins, local-wins, remote-wins, keep-both, skip
    #[arg(long)]
    conflict: Option<ConflictStrategy>,

    /// Per-transfer bandwidth ceiling in bytes per second (0 = unlimited)
    #[arg(long)]
    bandwidth: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> Result<SyncConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => SyncConfig::default_path().context("No configuration directory available")?,
        };
        let mut config = SyncConfig::load(&path)?;

        if let Some(root) = &self.local_root {
            config.local_root = root.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.remote_prefix = prefix.clone();
        }
        if !self.roles.is_empty() {
            config.roles = self.roles.clone();
        }
        if let Some(strategy) = self.conflict {
            config.conflict_strategy = strategy;
        }
        if let Some(bps) = self.bandwidth {
            config.bandwidth_limit = BandwidthLimit::new(bps);
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bucketsync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let remote = config.build_remote()?;
    let store = Arc::new(config.open_snapshots()?);
    let snapshots: Arc<dyn SnapshotStore> = store.clone();
    let scope = config.scope();

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, finishing current action...".yellow());
            signal_token.cancel();
        }
    });

    let (progress_tx, progress_rx) = mpsc::channel(64);
    let engine = SyncEngine::new(remote.clone(), snapshots)
        .with_excludes(config.excludes()?)
        .with_progress(progress_tx);

    println!(
        "{} {} {} {}",
        "Syncing".bold(),
        config.local_root.display(),
        "<->".dimmed(),
        remote.display_path(&config.remote_prefix)
    );

    if cli.dry_run {
        drop(progress_rx);
        let requests = engine
            .plan(&config.local_root, &config.remote_prefix, &scope, &cancel)
            .await?;
        if requests.is_empty() {
            println!("{}", "Everything is in sync".green());
        }
        for request in &requests {
            let size = request
                .local
                .as_ref()
                .or(request.remote.as_ref())
                .map(|node| node.format_size())
                .unwrap_or_default();
            println!("  {:<18} {:>10}  {}", paint(request.kind()), size, request.path);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let progress = tokio::spawn(render_progress(progress_rx));
    let resolver = PolicyResolver::new(config.conflict_strategy);
    let result = engine
        .sync(
            &config.local_root,
            &config.remote_prefix,
            &scope,
            Some(&resolver),
            &cancel,
        )
        .await;
    drop(engine);
    let _ = progress.await;

    if let Err(err) = store.compact().await {
        warn!(error = %format!("{:#}", err), "snapshot journal left for the next run");
    }

    let report = result?;
    print_summary(&report, config.bandwidth_limit);

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn render_progress(mut rx: mpsc::Receiver<SyncProgress>) {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }

    while let Some(update) = rx.recv().await {
        pb.set_length(update.total_items as u64);
        pb.set_position(update.processed_items as u64);
        pb.set_message(update.status);
    }
    pb.finish_and_clear();
}

fn paint(kind: SyncActionKind) -> colored::ColoredString {
    let label = kind.to_string();
    match kind {
        SyncActionKind::Upload => label.green(),
        SyncActionKind::Download => label.cyan(),
        SyncActionKind::DeleteLocal | SyncActionKind::DeleteRemote => label.red(),
        SyncActionKind::Conflict | SyncActionKind::KeepBoth => label.yellow(),
        SyncActionKind::PurgeSnapshot | SyncActionKind::Skip => label.dimmed(),
    }
}

fn print_summary(report: &SyncReport, limit: BandwidthLimit) {
    let stats = &report.stats;
    let heading = if report.cancelled {
        "Sync cancelled".yellow().bold()
    } else if report.failures.is_empty() {
        "Sync complete".green().bold()
    } else {
        "Sync finished with errors".red().bold()
    };

    println!("{} in {:.1}s", heading, report.duration_ms as f64 / 1000.0);
    println!(
        "  scanned   {} local, {} remote",
        stats.local_files, stats.remote_files
    );
    println!(
        "  uploaded  {}  downloaded {}  kept both {}",
        stats.uploaded, stats.downloaded, stats.kept_both
    );
    println!(
        "  deleted   {} local, {} remote  purged {}",
        stats.deleted_local, stats.deleted_remote, stats.purged
    );
    println!(
        "  conflicts {} ({} skipped)",
        stats.conflicts, stats.conflicts_skipped
    );
    if limit.is_limited() {
        println!("  bandwidth {} per transfer", limit.display());
    }
    println!(
        "  progress  {}/{}",
        report.processed_items, report.total_items
    );

    for failure in &report.failures {
        println!(
            "  {} {} {}: {}",
            "failed".red(),
            failure.kind,
            failure.path,
            failure.message
        );
    }
}
