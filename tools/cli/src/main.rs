//! envsync CLI - drive an environment store from the command line.
//!
//! Every command builds its own store over a SQLite file, does its work and
//! closes the store again, so pending changes are always flushed before the
//! process exits.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use envsync_common::{now_millis, EnvironmentRecord};
use envsync_storage::{AdapterRegistry, PersistenceAdapter, SoftDeleteAdapter, SqliteAdapter};
use envsync_sync::{StoreConfig, SyncAction, SyncStore};

#[derive(Parser)]
#[command(name = "envsync")]
#[command(about = "envsync - Synchronized mock API environment store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database file.
    #[arg(long, global = true, default_value = "envsync.db")]
    db: PathBuf,

    /// JSON store configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Persistence adapter for commands that only need the live state.
    #[arg(long, global = true, default_value = "sqlite")]
    adapter: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty environment.
    Add {
        /// Environment name.
        #[arg(short, long)]
        name: String,
    },

    /// Dispatch actions from a file with one JSON action per line.
    Apply {
        /// Action file.
        file: PathBuf,
    },

    /// List live environments.
    List,

    /// Print one environment as JSON.
    Show {
        /// Environment uuid.
        uuid: String,
    },

    /// List soft-deleted environments.
    Trash,

    /// Restore a soft-deleted environment.
    Restore {
        /// Environment uuid.
        uuid: String,
    },

    /// Delete a soft-deleted environment for good.
    Purge {
        /// Environment uuid.
        uuid: String,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = builder.with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let opts = Options {
        db: cli.db,
        config: cli.config,
        adapter: cli.adapter,
    };

    match cli.command {
        Commands::Add { name } => cmd_add(&opts, &name).await,

        Commands::Apply { file } => cmd_apply(&opts, &file).await,

        Commands::List => cmd_list(&opts).await,

        Commands::Show { uuid } => cmd_show(&opts, &uuid).await,

        Commands::Trash => cmd_trash(&opts).await,

        Commands::Restore { uuid } => cmd_restore(&opts, &uuid).await,

        Commands::Purge { uuid } => cmd_purge(&opts, &uuid).await,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "envsync", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Global options shared by the commands.
struct Options {
    db: PathBuf,
    config: Option<PathBuf>,
    adapter: String,
}

impl Options {
    /// Load the store configuration, or the defaults without `--config`.
    fn store_config(&self) -> Result<StoreConfig> {
        let Some(path) = &self.config else {
            return Ok(StoreConfig::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    fn sqlite(&self) -> Arc<SqliteAdapter> {
        Arc::new(SqliteAdapter::new(&self.db))
    }

    /// Build and initialize a store over the adapter named by `--adapter`.
    async fn open_store(&self) -> Result<SyncStore> {
        let adapter_config = match self.adapter.as_str() {
            "sqlite" => json!({ "path": self.db.to_string_lossy() }),
            _ => json!({}),
        };
        let adapter = AdapterRegistry::with_defaults()
            .resolve(&self.adapter, adapter_config)
            .with_context(|| format!("Unknown adapter '{}'", self.adapter))?;

        self.initialize(adapter).await
    }

    async fn initialize(&self, adapter: Arc<dyn PersistenceAdapter>) -> Result<SyncStore> {
        let config = self.store_config()?;
        let store = SyncStore::new(config.clone());
        store
            .initialize(adapter, config.sync_interval())
            .await
            .context("Failed to open store")?;
        Ok(store)
    }
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_record(record: &EnvironmentRecord) {
    println!(
        "{}  {:<24}  {}",
        record.environment_uuid,
        record.name().unwrap_or("-"),
        format_millis(record.timestamp)
    );
}

/// Create an empty environment.
async fn cmd_add(opts: &Options, name: &str) -> Result<()> {
    let store = opts.open_store().await?;
    let uuid = uuid::Uuid::new_v4().to_string();
    info!("Creating environment {}", name);

    let action = SyncAction::AddCloudEnvironment {
        environment: json!({
            "uuid": uuid,
            "name": name,
            "routes": [],
            "folders": [],
            "rootChildren": [],
            "callbacks": [],
            "data": []
        }),
        timestamp: now_millis(),
    };
    store.dispatch(action).await.context("Failed to add environment")?;
    store.close().await.context("Failed to save environment")?;

    println!("{}", uuid);
    Ok(())
}

/// Dispatch every action of a JSON-lines file.
async fn cmd_apply(opts: &Options, file: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut actions = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let action = SyncAction::from_json(line)
            .with_context(|| format!("Invalid action on line {}", index + 1))?;
        if action == SyncAction::Unknown {
            warn!("Line {}: unknown action type, it will be ignored", index + 1);
        }
        actions.push(action);
    }

    let store = opts.open_store().await?;
    let count = actions.len();
    for action in actions {
        store.dispatch(action).await?;
    }
    store.close().await.context("Failed to save changes")?;

    println!("Dispatched {} action(s)", count);
    Ok(())
}

/// List live environments.
async fn cmd_list(opts: &Options) -> Result<()> {
    let store = opts.open_store().await?;
    let state = store.get_state();

    if state.is_empty() {
        println!("No environments");
    }
    for record in &state.data {
        print_record(record);
    }

    store.close().await?;
    Ok(())
}

/// Print one environment.
async fn cmd_show(opts: &Options, uuid: &str) -> Result<()> {
    let store = opts.open_store().await?;
    let record = store.get_environment_by_uuid(uuid);
    store.close().await?;

    let record = record.with_context(|| format!("Environment {} not found", uuid))?;
    println!("{}", serde_json::to_string_pretty(&*record)?);
    Ok(())
}

/// List soft-deleted environments.
async fn cmd_trash(opts: &Options) -> Result<()> {
    let adapter = opts.sqlite();
    adapter.initialize().await.context("Failed to open database")?;

    let deleted = adapter.list_deleted().await?;
    if deleted.is_empty() {
        println!("Trash is empty");
    }
    for record in &deleted {
        print_record(record);
        if let Some(at) = record.deleted_at {
            println!("    deleted {}", format_millis(at));
        }
    }

    adapter.close().await?;
    Ok(())
}

/// Restore a soft-deleted environment into the live set.
async fn cmd_restore(opts: &Options, uuid: &str) -> Result<()> {
    let adapter = opts.sqlite();
    let store = opts.initialize(adapter.clone()).await?;

    let record = store
        .restore_environment(adapter.as_ref(), uuid)
        .await
        .with_context(|| format!("Failed to restore {}", uuid))?;
    store.close().await.context("Failed to save changes")?;

    println!("Restored {} ({})", uuid, record.name().unwrap_or("-"));
    Ok(())
}

/// Permanently delete an environment.
async fn cmd_purge(opts: &Options, uuid: &str) -> Result<()> {
    let adapter = opts.sqlite();
    adapter.initialize().await.context("Failed to open database")?;

    adapter
        .permanently_delete_environment(uuid)
        .await
        .with_context(|| format!("Failed to purge {}", uuid))?;
    adapter.close().await?;

    println!("Purged {}", uuid);
    Ok(())
}
