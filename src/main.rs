use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use warden::config::{LoggingConfig, WardenConfig};
use warden::middleware::{Admission, FixedKey, Outcome};
use warden::store::{CounterStore, RedisStore};

/// Operator tool for the Warden counter store.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate the sliding window for a key once, recording the event if admitted
    Check {
        /// Key to evaluate
        key: String,
    },
    /// Inspect or correct a shared active-unit counter
    Counter {
        #[command(subcommand)]
        action: CounterAction,
    },
}

#[derive(Debug, Subcommand)]
enum CounterAction {
    /// Print the current value
    Get {
        /// Counter key (defaults to `active.key`)
        key: Option<String>,
    },
    /// Delete the counter, e.g. after releases failed and left it inflated
    Reset {
        /// Counter key (defaults to `active.key`)
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = WardenConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(store = %config.store.url, "Configuration loaded");

    let store: Arc<dyn CounterStore> = Arc::new(
        RedisStore::connect_with_config(&config.store.url, config.store.redis())
            .await
            .context("connecting to counter store")?,
    );

    match cli.command {
        Command::Check { key } => {
            let limiter = Arc::new(config.sliding_window.build(store));
            let admission: Admission<()> =
                Admission::with_key_generator(limiter, FixedKey(key.clone()));

            let outcome = admission.admit(&()).await;
            let mut report = json!({ "key": key, "outcome": outcome.label() });
            if let Outcome::Failed(e) = &outcome {
                report["error"] = json!(e.to_string());
            }
            println!("{}", report);

            if let Outcome::Failed(e) = outcome {
                return Err(e.into());
            }
        }
        Command::Counter { action } => match action {
            CounterAction::Get { key } => {
                let key = key.unwrap_or_else(|| config.active.key.clone());
                let value = store.get(&key).await?;
                println!("{}", json!({ "key": key, "value": value }));
            }
            CounterAction::Reset { key } => {
                let key = key.unwrap_or_else(|| config.active.key.clone());
                let before = store.get(&key).await?;
                store.reset(&key).await?;
                warn!(key = %key, before = ?before, "Counter reset by operator");
                println!("{}", json!({ "key": key, "reset": true, "before": before }));
            }
        },
    }

    Ok(())
}

/// Initialise tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
