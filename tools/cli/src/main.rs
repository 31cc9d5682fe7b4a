//! Draftsync CLI - replay editing sessions against the autosave engine.
//!
//! Scripts drive an engine backed by the in-memory store, so the save
//! lifecycle (debounce, retries, offline queuing, conflicts) can be
//! observed without a real backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use draftsync_autosave::{
    AutosaveConfig, AutosaveEngine, AutosaveHooks, ConflictChoice, ConnectivityMonitor,
    MemoryPersister, PersistError, SaveState,
};
use draftsync_common::DocumentId;

#[derive(Parser)]
#[command(name = "draftsync")]
#[command(about = "Draftsync - Autosave engine simulator")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an editing script and print every status change.
    Simulate {
        /// Script file (JSON).
        #[arg(short, long)]
        script: PathBuf,

        /// Override the debounce window in milliseconds.
        #[arg(short, long)]
        delay_ms: Option<u64>,

        /// Engine configuration file (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default engine configuration.
    Config,
}

/// An editing session to replay.
#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default = "default_document")]
    document: String,
    /// Content loaded at session start.
    #[serde(default)]
    initial: Value,
    steps: Vec<Step>,
}

fn default_document() -> String {
    "draft".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Edit {
        data: Value,
    },
    Wait {
        ms: u64,
    },
    Offline,
    Online,
    RemoteEdit {
        data: Value,
    },
    Fail {
        error: FailKind,
        #[serde(default)]
        message: String,
        #[serde(default)]
        code: Option<u16>,
    },
    ForceSave,
    Resolve {
        choice: ConflictChoice,
        #[serde(default)]
        data: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FailKind {
    Timeout,
    Aborted,
    Network,
    Conflict,
    Status,
    Other,
}

impl FailKind {
    fn into_error(self, message: String, code: Option<u16>) -> PersistError<Value> {
        match self {
            FailKind::Timeout => PersistError::timeout(message),
            FailKind::Aborted => PersistError::Aborted,
            FailKind::Network => PersistError::network(message),
            FailKind::Conflict => PersistError::conflict(None),
            FailKind::Status => PersistError::status(code.unwrap_or(500), message),
            FailKind::Other => PersistError::other(message),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Simulate {
            script,
            delay_ms,
            config,
        } => cmd_simulate(&script, delay_ms, config.as_deref()).await,

        Commands::Config => cmd_config(),
    }
}

/// Load the engine configuration, applying command line overrides.
fn load_config(path: Option<&Path>, delay_ms: Option<u64>) -> Result<AutosaveConfig> {
    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            AutosaveConfig::from_json(&json).context("Invalid configuration")?
        }
        None => AutosaveConfig::default(),
    };

    if let Some(delay_ms) = delay_ms {
        config = config.with_delay(Duration::from_millis(delay_ms));
        config.validate().context("Invalid delay")?;
    }
    Ok(config)
}

/// Replay a script against an engine backed by the in-memory store.
async fn cmd_simulate(script_path: &Path, delay_ms: Option<u64>, config: Option<&Path>) -> Result<()> {
    let raw = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;
    let script: Script = serde_json::from_str(&raw).context("Invalid script")?;
    let config = load_config(config, delay_ms)?;

    info!(
        "Simulating {} steps for document {}",
        script.steps.len(),
        script.document
    );

    let id = DocumentId::new(&script.document).context("Invalid document id")?;
    let store: Arc<MemoryPersister<Value>> = Arc::new(MemoryPersister::new());
    let monitor = ConnectivityMonitor::online();
    let engine = AutosaveEngine::spawn(
        id,
        script.initial,
        store.clone(),
        config,
        AutosaveHooks::new(),
        Some(&monitor),
    )
    .context("Failed to start autosave engine")?;

    let started = Instant::now();
    let mut rx = engine.subscribe();
    let watcher = tokio::spawn(async move {
        let mut last = rx.borrow_and_update().status;
        println!("[{:>6}ms] {}", 0, last);
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if state.status != last {
                println!(
                    "[{:>6}ms] {}{}",
                    started.elapsed().as_millis(),
                    state.status,
                    describe(&state)
                );
                last = state.status;
            }
        }
    });

    for step in script.steps {
        match step {
            Step::Edit { data } => engine.update(data),
            Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::Offline => monitor.set_online(false),
            Step::Online => monitor.set_online(true),
            Step::RemoteEdit { data } => store.remote_edit(data),
            Step::Fail {
                error,
                message,
                code,
            } => store.fail_next(error.into_error(message, code)),
            Step::ForceSave => match engine.force_save().await {
                Ok(result) => println!("  force save: {:?}", result),
                Err(e) => println!("  force save failed: {}", e),
            },
            Step::Resolve { choice, data } => {
                let resolved = engine.resolve_conflict(choice, data).await;
                println!("  resolve {:?}: {}", choice, if resolved { "ok" } else { "no-op" });
            }
        }
    }

    let state = engine.state();
    engine.shutdown().await;
    watcher.await.context("Status watcher failed")?;

    println!("\nFinal state:");
    println!("  Status: {}", state.status);
    if let Some(saved_at) = state.last_saved_at {
        println!("  Last saved: {}", saved_at.format("%H:%M:%S%.3f"));
    }
    if let Some(error) = &state.error {
        println!("  Error: {}", error);
    }
    println!("  Unsaved changes: {}", state.has_unsaved_changes);
    println!("  Pending changes: {}", state.has_pending_changes);
    println!("  Save calls: {}", store.call_count());
    println!("  Store version: {}", store.version());
    match store.stored() {
        Some(stored) => println!("  Stored: {}", serde_json::to_string(&stored)?),
        None => println!("  Stored: (nothing)"),
    }

    Ok(())
}

fn describe(state: &SaveState<Value>) -> String {
    if let Some(error) = &state.error {
        return format!(" ({})", error);
    }
    if state.has_pending_changes {
        return " (changes pending)".to_string();
    }
    String::new()
}

/// Print the default configuration.
fn cmd_config() -> Result<()> {
    let json = AutosaveConfig::default()
        .to_json()
        .context("Failed to serialize config")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_parsing() {
        let script: Script = serde_json::from_str(
            r#"{
                "document": "course-42",
                "initial": {"title": "A"},
                "steps": [
                    {"step": "edit", "data": {"title": "AB"}},
                    {"step": "wait", "ms": 1500},
                    {"step": "offline"},
                    {"step": "fail", "error": "status", "code": 503, "message": "unavailable"},
                    {"step": "force_save"},
                    {"step": "resolve", "choice": "remote"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(script.document, "course-42");
        assert_eq!(script.steps.len(), 6);
        assert!(matches!(script.steps[1], Step::Wait { ms: 1500 }));
        assert!(matches!(
            script.steps[5],
            Step::Resolve {
                choice: ConflictChoice::Remote,
                data: None
            }
        ));
    }

    #[test]
    fn test_fail_kind_mapping() {
        let err = FailKind::Status.into_error("unavailable".to_string(), Some(503));
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
        assert!(matches!(
            FailKind::Timeout.into_error(String::new(), None),
            PersistError::Timeout(_)
        ));
    }

    #[test]
    fn test_delay_override() {
        let config = load_config(None, Some(250)).unwrap();
        assert_eq!(config.delay_ms, 250);
        assert!(load_config(None, Some(0)).is_err());
    }
}
