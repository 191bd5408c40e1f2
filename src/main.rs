//! AeroVault — aircraft telemetry ingest and permanent-archive node
//!
//! Polls one or more ADS-B receiver feeds, archives every change batch
//! twice (clear Parquet + AES-256-GCM package) on the permanent-storage
//! network, rolls up per-aircraft tracks locally, and keeps its own
//! counters alive across reinstalls by snapshotting them to the same
//! network.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./aerovault.toml (or $AEROVAULT_CONFIG)
//! cargo run --release
//!
//! # Explicit config and keys directory
//! ./aerovault --config /etc/aerovault/node.toml --keys-dir /etc/aerovault/keys
//! ```
//!
//! # Environment Variables
//!
//! - `AEROVAULT_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aerovault::acquisition::FeedClient;
use aerovault::api::{create_app, ApiState};
use aerovault::backup::{restore_on_start_best_effort, run_snapshot_backup};
use aerovault::config::{self, AppConfig};
use aerovault::crypto::{Encryptor, KeyShareClient};
use aerovault::registration::register_node;
use aerovault::stats::{run_stats_persister, PipelineKind, StatsBroadcaster, StatsRegister};
use aerovault::store::{create_pool, run_migrations, ArchiveRecordStore, StatsStore, TrackStore};
use aerovault::tracker::{Orchestrator, PackageUuidRegistry};
use aerovault::upload::{ArchiveClient, ClearUploader, EncryptedUploader, UploadPipeline, Wallet};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "aerovault")]
#[command(about = "AeroVault aircraft telemetry archive node")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides AEROVAULT_CONFIG)
    #[arg(long)]
    config: Option<String>,

    /// Directory holding the wallet JWK file
    #[arg(long, default_value = "keys")]
    keys_dir: String,

    /// Override the API bind address (default from config)
    #[arg(short, long)]
    addr: Option<String>,

    /// Skip node self-registration at boot
    #[arg(long)]
    no_register: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    info!("🛩️  AeroVault starting");

    // ------------------------------------------------------------------
    // Configuration — fatal problems abort here, before anything runs.
    // ------------------------------------------------------------------
    let mut app_config = match &args.config {
        Some(path) => AppConfig::load_from_file(std::path::Path::new(path))
            .with_context(|| format!("failed to load config from {path}"))?,
        None => AppConfig::load(),
    };
    let keys_dir = std::path::PathBuf::from(&args.keys_dir);
    app_config
        .validate(&keys_dir)
        .context("configuration validation failed")?;

    let master_key = app_config.master_key().context("bad master key")?;
    let wallet = Arc::new(
        Wallet::load(&app_config.wallet_path(&keys_dir)).context("failed to load wallet")?,
    );
    info!(address = %wallet.address(), "Wallet loaded");

    let bind_addr = args
        .addr
        .clone()
        .unwrap_or_else(|| app_config.api.addr.clone());
    config::init(app_config);
    let cfg = config::get();

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------
    let pool = create_pool(&cfg.database.path)
        .await
        .context("failed to open database")?;
    run_migrations(&pool).await.context("migrations failed")?;

    let stats_store = Arc::new(StatsStore::new(pool.clone()));
    let record_store = Arc::new(ArchiveRecordStore::new(pool.clone()));
    let track_store = Arc::new(TrackStore::new(pool.clone()));

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------
    let encryptor = Arc::new(Encryptor::new(master_key));
    let keyshare = Arc::new(KeyShareClient::new(&cfg.services.keyshare_url));
    let archive = Arc::new(ArchiveClient::new(&cfg.services.gateway_url, wallet));
    let registry = Arc::new(PackageUuidRegistry::new());

    // Restore runs before the live register initialises.
    let boot_ms = chrono::Utc::now().timestamp_millis();
    let outcome =
        restore_on_start_best_effort(&archive, &encryptor, &stats_store, boot_ms).await;
    info!(outcome = ?outcome, "Counter restore complete");

    let stats = Arc::new(StatsRegister::new(boot_ms));
    if let Ok(Some(row)) = stats_store.load().await {
        stats.load_snapshot(&row.snapshot);
    }

    let clear_pipeline = UploadPipeline::new(
        PipelineKind::Clear,
        Arc::clone(&archive),
        ClearUploader::new(
            Arc::clone(&encryptor),
            Arc::clone(&record_store),
            Arc::clone(&track_store),
        ),
        Arc::clone(&stats),
    );
    let encrypted_pipeline = UploadPipeline::new(
        PipelineKind::Encrypted,
        Arc::clone(&archive),
        EncryptedUploader::new(
            Arc::clone(&encryptor),
            Arc::clone(&keyshare),
            Arc::clone(&registry),
            Arc::clone(&record_store),
            Arc::clone(&stats),
        ),
        Arc::clone(&stats),
    );

    let feeds: Vec<FeedClient> = cfg
        .antennas
        .iter()
        .filter(|a| a.enabled)
        .map(|a| FeedClient::new(&a.id, &a.url))
        .collect();

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<()> = JoinSet::new();

    if args.no_register {
        info!("Node self-registration skipped (--no-register)");
    } else {
        let archive_reg = Arc::clone(&archive);
        tasks.spawn(async move {
            if let Err(e) = register_node(&archive_reg, config::get()).await {
                warn!(error = %e, "Node self-registration failed — continuing");
            }
        });
    }

    {
        let orchestrator = Orchestrator::new(
            feeds,
            Arc::clone(&registry),
            Arc::clone(&clear_pipeline),
            Arc::clone(&encrypted_pipeline),
            Arc::clone(&stats),
            Arc::clone(&track_store),
            cancel.clone(),
        );
        tasks.spawn(orchestrator.run());
    }

    tasks.spawn(run_stats_persister(
        Arc::clone(&stats),
        Arc::clone(&stats_store),
        cancel.clone(),
    ));

    tasks.spawn(run_snapshot_backup(
        Arc::clone(&stats),
        Arc::clone(&encryptor),
        Arc::clone(&archive),
        cancel.clone(),
    ));

    // ------------------------------------------------------------------
    // Operator surface
    // ------------------------------------------------------------------
    let broadcaster = Arc::new(StatsBroadcaster::new(
        Arc::clone(&stats),
        Arc::clone(&track_store),
        Arc::clone(&clear_pipeline),
        Arc::clone(&encrypted_pipeline),
    ));
    let app = create_app(ApiState {
        broadcaster,
        api_enabled: cfg.api.enabled,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, enabled = cfg.api.enabled, "API surface listening");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "API server error");
        }
    });

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown signal received — stopping tracker and timers");
    cancel.cancel();

    while tasks.join_next().await.is_some() {}
    let _ = server.await;

    info!("AeroVault stopped");
    Ok(())
}
