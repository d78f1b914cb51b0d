//! Mnemo CLI - Sync a local flashcard vault with Anki
//!
//! Push, pull, and watch from the terminal with minimal friction.

mod store;

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use mnemo_core::engine::SyncEngine;
use mnemo_core::scheduler::AutoSyncScheduler;
use mnemo_core::{SyncConfig, SyncLogEntry};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use store::JsonDirStore;

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Sync a local flashcard vault with Anki over AnkiConnect")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the card vault directory
    #[arg(long, value_name = "PATH")]
    vault: Option<PathBuf>,

    /// Optional path to the sync state directory
    #[arg(long, value_name = "PATH")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Push all changed cards to Anki
    Sync {
        /// Bypass the incremental gate and re-evaluate every card
        #[arg(long)]
        full: bool,
    },
    /// Push one deck (or all decks) to Anki
    Push {
        /// Deck to push; every deck when omitted
        deck: Option<String>,
    },
    /// Pull one Anki deck into the vault
    Pull {
        /// Deck to pull
        deck: String,
    },
    /// Show connection state, decks, and recent runs
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch for changes and sync automatically
    Watch,
    /// Manage deck snapshots
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List stored snapshots, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore one snapshot into the vault
    Restore {
        /// Backup ID as printed by `mnemo backup list`
        id: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] mnemo_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid backup id '{0}'")]
    InvalidBackupId(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mnemo=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);
    let vault_dir = resolve_vault_dir(cli.vault, &data_dir);

    match cli.command {
        Commands::Sync { full } => run_sync(full, &data_dir, &vault_dir).await?,
        Commands::Push { deck } => run_push(deck.as_deref(), &data_dir, &vault_dir).await?,
        Commands::Pull { deck } => run_pull(&deck, &data_dir, &vault_dir).await?,
        Commands::Status { json } => run_status(json, &data_dir, &vault_dir).await?,
        Commands::Watch => run_watch(&data_dir, &vault_dir).await?,
        Commands::Backup { command } => match command {
            BackupCommands::List { json } => run_backup_list(json, &data_dir, &vault_dir).await?,
            BackupCommands::Restore { id } => run_backup_restore(&id, &data_dir, &vault_dir).await?,
        },
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

fn open_engine(data_dir: &Path, vault_dir: &Path) -> Result<SyncEngine<JsonDirStore>, CliError> {
    std::fs::create_dir_all(data_dir)?;
    let config = load_config(data_dir, vault_dir)?;
    let store = JsonDirStore::open(vault_dir)?;
    Ok(SyncEngine::open(store, config, data_dir, vault_dir)?)
}

async fn run_sync(full: bool, data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(data_dir, vault_dir)?;
    require_peer(&engine).await?;

    if full {
        engine.request_full_resync().await;
    }
    let log = engine.push_all().await?;
    print_log(&log);
    Ok(())
}

async fn run_push(deck: Option<&str>, data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(data_dir, vault_dir)?;
    require_peer(&engine).await?;

    let log = match deck {
        Some(deck) => engine.push_deck(deck).await?,
        None => engine.push_all().await?,
    };
    print_log(&log);
    Ok(())
}

async fn run_pull(deck: &str, data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(data_dir, vault_dir)?;
    require_peer(&engine).await?;

    let log = engine.pull_deck(deck).await?;
    print_log(&log);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    connected: bool,
    endpoint: String,
    decks: Vec<DeckStatus>,
}

#[derive(Debug, Serialize)]
struct DeckStatus {
    name: String,
    cards: usize,
}

async fn run_status(as_json: bool, data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(data_dir, vault_dir)?;
    let connected = engine.supervisor().probe().await;

    let decks = engine
        .deck_summary()
        .await?
        .into_iter()
        .map(|(name, cards)| DeckStatus { name, cards })
        .collect::<Vec<_>>();

    if as_json {
        let report = StatusReport {
            connected,
            endpoint: engine.config().endpoint.clone(),
            decks,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let peer = if connected { "connected" } else { "not reachable" };
    println!("Anki: {peer} ({})", engine.config().endpoint);
    if decks.is_empty() {
        println!("No decks in vault yet");
    } else {
        for deck in decks {
            println!("{:<30}  {} cards", deck.name, deck.cards);
        }
    }
    Ok(())
}

async fn run_watch(data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let engine = Arc::new(open_engine(data_dir, vault_dir)?);
    let supervisor = engine.supervisor();
    supervisor.probe().await;
    let heartbeat = supervisor.spawn_heartbeat();

    let (scheduler, _notifier) =
        AutoSyncScheduler::new(Arc::clone(&engine), Arc::clone(&supervisor), engine.config());
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    println!("Watching for changes; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    let _ = shutdown_tx.send(());
    let _ = scheduler_task.await;
    heartbeat.abort();

    for log in engine.history() {
        println!("{}", log.summary());
    }
    Ok(())
}

async fn run_backup_list(as_json: bool, data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(data_dir, vault_dir)?;
    let backups = engine.backups().list_backups()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups yet");
        return Ok(());
    }
    for meta in backups {
        let when = Utc
            .timestamp_millis_opt(meta.created_at)
            .single()
            .map_or_else(|| meta.created_at.to_string(), |ts| ts.to_rfc3339());
        println!(
            "{}  {:<20}  {} cards  {}",
            meta.id, meta.scope, meta.record_count, when
        );
    }
    Ok(())
}

async fn run_backup_restore(id: &str, data_dir: &Path, vault_dir: &Path) -> Result<(), CliError> {
    let backup_id = id
        .parse::<Uuid>()
        .map_err(|_| CliError::InvalidBackupId(id.to_string()))?;

    let engine = open_engine(data_dir, vault_dir)?;
    let restored = engine.restore_backup(backup_id).await?;
    println!("Restored {restored} cards");
    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "mnemo", buffer);
}

/// Fail fast with a readable message when Anki is unreachable, instead of
/// surfacing the first mid-batch RPC failure
async fn require_peer(engine: &SyncEngine<JsonDirStore>) -> Result<(), CliError> {
    if engine.supervisor().probe().await {
        Ok(())
    } else {
        Err(mnemo_core::Error::NotRunning("connection refused".to_string()).into())
    }
}

fn print_log(log: &SyncLogEntry) {
    println!("{}", log.summary());
    for warning in &log.warnings {
        println!("warning: {warning}");
    }
    for error in &log.errors {
        match &error.local_id {
            Some(id) => println!("failed {id}: {}", error.message),
            None => println!("failed: {}", error.message),
        }
    }
}

fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("MNEMO_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mnemo")
        })
}

fn resolve_vault_dir(cli_vault: Option<PathBuf>, data_dir: &Path) -> PathBuf {
    cli_vault
        .or_else(|| env::var_os("MNEMO_VAULT").map(PathBuf::from))
        .unwrap_or_else(|| data_dir.join("vault"))
}

/// Read `config.json` from the data directory, falling back to defaults.
///
/// The vault directory name doubles as the deep-link vault name unless the
/// config sets one explicitly.
fn load_config(data_dir: &Path, vault_dir: &Path) -> Result<SyncConfig, CliError> {
    let path = data_dir.join("config.json");
    let mut config = if path.is_file() {
        serde_json::from_str::<SyncConfig>(&std::fs::read_to_string(&path)?)
            .map_err(|error| CliError::Config(format!("{}: {error}", path.display())))?
    } else {
        SyncConfig::default()
    };

    if let Ok(endpoint) = env::var("MNEMO_ENDPOINT") {
        config.endpoint = endpoint;
    }
    if config.vault_name.is_empty() {
        if let Some(name) = vault_dir.file_name().and_then(|name| name.to_str()) {
            config.vault_name = name.to_string();
        }
    }
    Ok(config)
}
