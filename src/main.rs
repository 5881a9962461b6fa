use clap::Parser;
use dotenvy::dotenv;
use filedrive_backend::infrastructure::{database, storage};
use filedrive_backend::services::file_service::FileService;
use filedrive_backend::services::reaper::SessionReaper;
use filedrive_backend::services::upload_service::UploadService;
use filedrive_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service type to run (api, reaper, all)
    #[arg(short, long, default_value = "all")]
    mode: String,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filedrive_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting filedrive backend [mode: {}]", args.mode);

    let db = database::setup_database().await?;
    let object_storage = storage::setup_storage().await;
    let config = filedrive_backend::config::UploadConfig::from_env();
    info!(
        "Upload config: max size {} MB, chunk size {} MB, session TTL {}s",
        config.max_file_size / 1024 / 1024,
        config.chunk_size / 1024 / 1024,
        config.session_ttl_secs
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::new();

    if args.mode == "reaper" || args.mode == "all" {
        let reaper = SessionReaper::new(
            db.clone(),
            object_storage.clone(),
            std::time::Duration::from_secs(config.reaper_interval_secs),
            shutdown_rx.clone(),
        );
        handles.push(tokio::spawn(reaper.run()));
        info!("Session reaper initialized");
    }

    if args.mode == "api" || args.mode == "all" {
        let file_service = Arc::new(FileService::new(db.clone(), object_storage.clone()));
        let upload_service = Arc::new(UploadService::new(
            db.clone(),
            object_storage.clone(),
            file_service.clone(),
            config.clone(),
        ));

        let state = AppState {
            db: db.clone(),
            storage: object_storage.clone(),
            upload_service,
            file_service,
            config: config.clone(),
        };

        let trace_layer = TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        );

        let app = create_app(state).layer(trace_layer);
        let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("API server listening on http://0.0.0.0:{}", args.port);
        info!(
            "Swagger UI available at http://localhost:{}/swagger-ui",
            args.port
        );

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                })
                .await
            {
                error!("Server runtime error: {}", e);
            }
        });
        handles.push(server_handle);
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    info!("Shutting down backend services");
    for handle in handles {
        let _ = handle.await;
    }

    info!("Backend exited cleanly");
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
            info!("Ctrl+C received, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, initiating graceful shutdown");
        },
    }
}
