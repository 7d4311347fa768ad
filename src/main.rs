use clap::Parser;
use dotenvy::dotenv;
use rust_drive_backend::config::StorageConfig;
use rust_drive_backend::infrastructure::database;
use rust_drive_backend::services::media::FfmpegTransformer;
use rust_drive_backend::services::quota::QuotaLedger;
use rust_drive_backend::services::session::SessionStore;
use rust_drive_backend::services::transfer_service::TransferService;
use rust_drive_backend::services::upload_service::UploadService;
use rust_drive_backend::services::worker::TransferWorker;
use rust_drive_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, worker, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initial Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_drive_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Rust Drive Backend [Mode: {}]...", args.mode);

    // 2. Setup Common Infrastructure
    let db = database::setup_database().await?;
    let config = StorageConfig::from_env();
    info!(
        "💾 Storage Config: Root={}, Default Quota={}MB, Segment={}s",
        config.data_root.display(),
        config.default_quota_bytes / 1024 / 1024,
        config.segment_seconds
    );
    tokio::fs::create_dir_all(config.temp_root()).await?;
    tokio::fs::create_dir_all(config.files_root()).await?;

    let quota = Arc::new(QuotaLedger::new(
        db.clone(),
        config.default_quota_bytes,
        Duration::from_secs(config.quota_cache_ttl_secs),
    ));
    let sessions = Arc::new(SessionStore::new(
        config.temp_root(),
        Duration::from_secs(config.session_ttl_secs),
    ));
    let worker_wake = Arc::new(Notify::new());

    // 3. Setup Graceful Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    // 4. Initialize Worker Service
    if args.mode == "worker" || args.mode == "all" {
        let transfer = Arc::new(TransferService::new(
            db.clone(),
            Arc::new(FfmpegTransformer::new(&config)),
            config.files_root(),
        ));
        let worker = TransferWorker::new(
            db.clone(),
            transfer,
            worker_wake.clone(),
            shutdown_rx.clone(),
            Duration::from_secs(config.worker_poll_secs),
        );
        handles.push(tokio::spawn(worker.run()));
        info!("👷 Transfer worker initialized.");
    }

    // 5. Initialize API Service
    if args.mode == "api" || args.mode == "all" {
        let upload = Arc::new(UploadService::new(
            db.clone(),
            quota.clone(),
            sessions.clone(),
            config.max_chunk_size,
            worker_wake.clone(),
        ));

        let state = AppState {
            db: db.clone(),
            upload,
            config: config.clone(),
        };

        let app = create_app(state).layer(tower_http::trace::TraceLayer::new_for_http());
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                })
                .await
            {
                error!("❌ Server runtime error: {}", e);
            }
        });
        handles.push(server_handle);
    }

    // 6. Wait for Shutdown Signal
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("🛑 Shutting down backend services...");

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
