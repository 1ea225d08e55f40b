//! chainbridge: stream chain-sync blocks into Kafka topics.
//!
//! Usage:
//! ```bash
//! chainbridge run          --config config.yaml
//! chainbridge check-config --config config.yaml
//! chainbridge info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use chainbridge_core::checkpoint::CheckpointManager;
use chainbridge_core::encoder::EncoderRegistry;
use chainbridge_core::processor::BlockProcessor;
use chainbridge_core::publisher::Publisher;
use chainbridge_core::router::Router;
use chainbridge_core::syncer::Syncer;
use chainbridge_kafka::KafkaPublisher;
use chainbridge_ogmios::OgmiosFeed;

mod api;
mod logging;
mod settings;

use settings::AppConfig;

#[derive(Parser)]
#[command(
    name = "chainbridge",
    about = "Rollback-aware bridge from a Cardano chain-sync feed to Kafka",
    long_about = "
ChainBridge follows an Ogmios chain-sync feed, routes each transaction to
Kafka topics by address, policy, certificate and governance rules, and
publishes rollback notices when the chain switches forks.

ENVIRONMENT VARIABLES:
  CHAINBRIDGE_<SECTION>__<KEY>   Override any config key, e.g.
                                 CHAINBRIDGE_KAFKA__BROKERS=k1:9092,k2:9092
  RUST_LOG                       Log filter (overrides log.level)
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync loop and the admin API
    Run {
        /// Configuration file (YAML, TOML or JSON)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Load and validate the configuration, then exit
    #[command(name = "check-config")]
    CheckConfig {
        /// Configuration file (YAML, TOML or JSON)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Show build and default settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::CheckConfig { config } => cmd_check_config(&config),
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_run(path: &Path) -> Result<()> {
    let config = AppConfig::load(path)?;
    logging::init_tracing(&config.log);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %path.display(), "starting chainbridge");

    let (rule_store, checkpoint_store) =
        chainbridge_storage::connect(&config.db.url, config.db.max_connections)
            .await
            .context("failed to connect to the database")?;

    let publisher: Arc<dyn Publisher> =
        Arc::new(KafkaPublisher::new(&config.kafka).context("failed to create Kafka publisher")?);

    let rules = Arc::new(Router::new(rule_store));
    let encoders = EncoderRegistry::with_builtins(config.encoder.network_magic);
    let encoder_names = Arc::new(encoders.names());
    let processor = Arc::new(BlockProcessor::new(rules.clone(), encoders, publisher));

    let sync_config = config.sync_config();
    let checkpoints = Arc::new(CheckpointManager::new(checkpoint_store, sync_config.max_checkpoints));
    let feed = Arc::new(OgmiosFeed::new(config.ogmios_config()));
    let syncer = Arc::new(Syncer::new(feed, processor, checkpoints, sync_config));

    let app = api::router(api::ApiState {
        rules,
        sync: syncer.handle(),
        encoders: encoder_names,
    });
    let addr = config.listen_address()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin API on {addr}"))?;
    tracing::info!(%addr, "admin API listening");

    let cancel = CancellationToken::new();
    let signals = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            cancel.cancel();
        })
    };

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            syncer.run(cancel).await;
            Ok(())
        });
    }
    {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .context("admin API server failed")
        });
    }

    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("task panicked: {e}")),
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "shutting down after task failure");
            cancel.cancel();
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    signals.abort();

    tracing::info!("chainbridge stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = AppConfig::load(path)?;
    let backend = config.db.url.split(':').next().unwrap_or_default();
    println!("Configuration OK ({})", path.display());
    println!("  ogmios.endpoint          {}", config.ogmios.endpoint);
    println!("  ogmios.pipeline_depth    {}", config.ogmios.pipeline_depth);
    println!("  kafka.brokers            {}", config.kafka.brokers);
    println!("  kafka.acks               {}", config.kafka.acks);
    println!("  db backend               {backend}");
    println!("  api.listen_address       {}", config.api.listen_address);
    println!("  chainsync.checkpoints    {}", config.chainsync.max_checkpoints_to_keep);
    println!("  chainsync.rollback_topic {}", config.chainsync.rollback_topic);
    println!("  encoder.network_magic    {}", config.encoder.network_magic);
    Ok(())
}

fn cmd_info() {
    let defaults = AppConfig::default();
    println!("ChainBridge v{}", env!("CARGO_PKG_VERSION"));
    println!("  Encoders: {}", EncoderRegistry::with_builtins(0).names().join(", "));
    println!("  Storage backends: {}", chainbridge_storage::enabled_backends().join(", "));
    println!("  Default checkpoints kept: {}", defaults.chainsync.max_checkpoints_to_keep);
    println!("  Default retry delay: {}s", defaults.chainsync.retry_delay_secs);
    println!("  Default rollback topic: {}", defaults.chainsync.rollback_topic);
    println!("  Rule cache TTL: {}s", chainbridge_core::router::DEFAULT_CACHE_TTL.as_secs());
}
