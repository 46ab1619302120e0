/*!
 * Corral CLI - administrative front end
 *
 * Reads a fleet configuration, opens the document store and answers
 * read-only fleet queries. It carries no controller transport: any operation
 * that needs to dial a controller reports it as unreachable.
 */

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use corral::{logging, FleetConfig, FleetManager, FleetParams};
use corral_connect::{ConnectError, DialTarget, Dialer};
use corral_core_interface::{ControllerApi, Identity};
use corral_core_pubsub::Hub;
use corral_core_resilience::SessionPool;
use corral_store::{MemoryStore, StoreSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "corral")]
#[command(version, about = "Fleet manager for remote model controllers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "corral.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store schema
    Init,

    /// List controllers an identity can read
    Controllers {
        #[arg(long)]
        user: String,

        /// Groups the user belongs to
        #[arg(long = "group", value_name = "GROUP")]
        groups: Vec<String>,
    },

    /// Print the oldest version among public controllers
    EarliestVersion {
        #[arg(long)]
        user: String,

        #[arg(long = "group", value_name = "GROUP")]
        groups: Vec<String>,
    },
}

/// Dialer for a process with no controller transport.
struct UnconfiguredDialer;

#[async_trait]
impl Dialer for UnconfiguredDialer {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn ControllerApi>, ConnectError> {
        Err(ConnectError::dial_failed(
            target.controller.to_string(),
            "no controller transport configured",
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = FleetConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_logging(&config)?;

    match config.database.path.clone() {
        #[cfg(feature = "sqlite")]
        Some(path) => {
            let store = corral_store::SqliteStore::open(&path)
                .await
                .with_context(|| format!("opening store {}", path.display()))?;
            info!(path = %path.display(), "Opened SQLite store");
            run(cli.command, &config, store.session()).await
        }
        #[cfg(not(feature = "sqlite"))]
        Some(path) => anyhow::bail!(
            "database path {} configured but corral was built without sqlite",
            path.display()
        ),
        None => {
            info!("Using in-memory store");
            run(cli.command, &config, MemoryStore::new().session()).await
        }
    }
}

async fn run<S: StoreSession>(
    command: Commands,
    config: &FleetConfig,
    template: S,
) -> anyhow::Result<()> {
    let fleet = FleetManager::new(FleetParams {
        sessions: SessionPool::new(template, config.session_pool_size)?,
        dialer: Arc::new(UnconfiguredDialer),
        hub: Hub::new(config.pubsub_max_concurrency),
        controller_admin: config.controller_admin.clone(),
        authorizer: None,
    })?;

    let result = match command {
        Commands::Init => {
            println!("Store ready");
            Ok(())
        }
        Commands::Controllers { user, groups } => {
            let actor = Identity::new(user).with_groups(groups);
            fleet.list_controllers(&actor).await.map(|controllers| {
                for c in controllers {
                    let version = c.version.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
                    let flags = match (c.public, c.deprecated) {
                        (true, true) => "public,deprecated",
                        (true, false) => "public",
                        (false, true) => "deprecated",
                        (false, false) => "",
                    };
                    println!("{:<32} {:<10} {}", c.path, version, flags);
                }
            })
        }
        Commands::EarliestVersion { user, groups } => {
            let actor = Identity::new(user).with_groups(groups);
            fleet
                .earliest_controller_version(&actor)
                .await
                .map(|v| println!("{v}"))
        }
    };

    fleet.close().await;
    Ok(result?)
}
