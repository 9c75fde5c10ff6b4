use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use abtest_session::{
    config::{Config, LogFormat},
    platform::{HeadlessPlatform, PagePlatform, Platform},
    storage::{MemoryCookieJar, SqliteLocalStore, StorageLocation},
    HttpTransport, ParticipateOptions, Session,
};

/// Visitor identity and A/B experiment client.
#[derive(Parser, Debug)]
#[command(name = "abtest", version, about)]
struct Cli {
    /// Use this visitor id instead of a stored or generated one
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Persist identity and assignments in this SQLite file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Get the alternative to show for an experiment
    Participate {
        /// Experiment name
        experiment: String,

        /// Candidate alternatives (at least two)
        alternatives: Vec<String>,

        /// Share of traffic to enroll
        #[arg(long)]
        traffic_fraction: Option<f64>,

        /// Alternative to force without asking the service
        #[arg(long)]
        force: Option<String>,
    },

    /// Record a conversion for an experiment
    Convert {
        /// Experiment name
        experiment: String,

        /// Key performance indicator
        #[arg(long)]
        kpi: Option<String>,
    },

    /// Print the resolved visitor identity
    Identity,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Some(client_id) = cli.client_id {
        config.identity.client_id = Some(client_id);
    }

    let platform: Arc<dyn Platform> = match &cli.store {
        Some(path) => {
            config.database.path = path.clone();
            // No real cookie jar outside a page; keep identities in the store.
            config.identity.client_id_storage = StorageLocation::Local;
            config.identity.session_id_storage = StorageLocation::Local;
            config.experiments.storage = StorageLocation::Local;

            let store = match SqliteLocalStore::new(&config.database).await {
                Ok(s) => {
                    info!(path = %config.database.path.display(), "Local store initialized");
                    s
                }
                Err(e) => {
                    error!(error = %e, "Failed to initialize local store");
                    return Err(e.into());
                }
            };

            Arc::new(
                PagePlatform::new()
                    .with_cookie_jar(Arc::new(MemoryCookieJar::new()))
                    .with_local_store(Arc::new(store)),
            )
        }
        None => Arc::new(HeadlessPlatform),
    };

    let transport = HttpTransport::new(&config.request)?;
    let session = Session::new(config, platform, Arc::new(transport)).await;

    let output = match cli.command {
        Command::Participate {
            experiment,
            alternatives,
            traffic_fraction,
            force,
        } => {
            let options = ParticipateOptions {
                traffic_fraction,
                force,
            };
            let response = session
                .participate(&experiment, &alternatives, options)
                .await?;
            serde_json::to_value(&response)?
        }
        Command::Convert { experiment, kpi } => {
            let response = session.convert(&experiment, kpi.as_deref()).await?;
            serde_json::to_value(&response)?
        }
        Command::Identity => json!({
            "client_id": session.client_id(),
            "session_id": session.session_id(),
            "session_is_new": session.session_is_new(),
            "new_to_beacon": session.new_to_beacon(),
            "persistent": session.storage().is_enabled(),
        }),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
