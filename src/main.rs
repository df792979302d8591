use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use syncwatch::analysis::{
    self, ChangeBuilder, LocalChange, PendingChanges, RawEvent, Sha256Checksummer,
};
use syncwatch::{InMemoryMirror, LocalWatcher, Settings};

#[derive(Parser)]
#[command(name = "syncwatch")]
#[command(version, about = "Local change analysis for a file synchronization client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Replay a recorded batch of raw events and print the resulting changes
    Analyse {
        /// JSON array of raw events (`{"type": "add", "path": ..., "stats": ...}`)
        #[arg(long)]
        events: PathBuf,

        /// Sync root the event paths are relative to (overrides config)
        #[arg(long)]
        root: Option<PathBuf>,

        /// JSON array of mirror records to analyse against
        #[arg(long)]
        mirror: Option<PathBuf>,

        /// Pending changes carried between runs (read, then rewritten)
        #[arg(long)]
        pending: Option<PathBuf>,

        /// Apply the changes to the in-memory mirror and print its final tree.
        /// Records the batch never mentions are kept, not trashed as offline
        /// deletions.
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Serialize)]
struct AnalysisReport {
    changes: Vec<LocalChange>,
    pending: PendingChanges,
}

#[derive(Serialize)]
struct ApplyReport {
    pending: PendingChanges,
    tree: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });
    syncwatch::logging::init_with_config(&settings.logging);

    match run(cli.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, mut settings: Settings) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => {
            let current = std::env::current_dir().context("cannot read current directory")?;
            let path = Settings::init_config_file(&current, force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
        }

        Commands::Config => {
            println!("{}", toml::to_string_pretty(&settings)?);
        }

        Commands::Analyse {
            events,
            root,
            mirror,
            pending,
            apply,
        } => {
            let root = match root.or(settings.sync_path.clone()) {
                Some(root) => root,
                None => std::env::current_dir().context("cannot read current directory")?,
            };
            let events = read_events(&events)?;
            let mirror = Arc::new(match mirror {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    InMemoryMirror::from_json(&json)?
                }
                None => InMemoryMirror::new(),
            });

            if apply {
                settings.watcher.pending_file = pending;
                let mut watcher = LocalWatcher::builder()
                    .sync_path(root)
                    .store(mirror.clone())
                    .synchronizer(mirror.clone())
                    .config(settings.watcher)
                    .offline_detection(false)
                    .build()?;
                watcher.flush(events).await?;

                let report = ApplyReport {
                    pending: watcher.pending().clone(),
                    tree: mirror.tree().await,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let mut carried = match pending.as_deref() {
                    Some(path) => PendingChanges::load(path)?,
                    None => PendingChanges::new(),
                };
                let builder =
                    ChangeBuilder::new(root, mirror, Arc::new(Sha256Checksummer::new()));
                let mut candidates = Vec::with_capacity(events.len());
                for event in events.into_iter().filter(|e| !e.is_root()) {
                    candidates.extend(builder.build(event).await);
                }
                let changes = analysis::analyse(candidates, &mut carried)?;
                if let Some(path) = pending.as_deref() {
                    carried
                        .save(path)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                }

                let report = AnalysisReport {
                    changes,
                    pending: carried,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }
    Ok(())
}

fn read_events(path: &Path) -> anyhow::Result<Vec<RawEvent>> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(RawEvent::decode_batch(&json)?)
}
