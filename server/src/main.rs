mod actuator;
mod error;
mod pan;
mod routes;
mod static_files;
mod tls;

use std::path::PathBuf;
use std::sync::Arc;

use gimbal_cam_capture::{driver, CaptureSettings, CaptureWorker};
use gimbal_cam_common::config::Config;
use gimbal_cam_common::frame::FrameSlot;
use tracing::{error, info, warn};

use crate::routes::AppState;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let camera = driver::from_config(&config.camera).unwrap_or_else(|e| {
        error!(error = %e, "invalid camera configuration");
        std::process::exit(1);
    });
    let actuator = actuator::from_config(&config.pantilt).unwrap_or_else(|e| {
        error!(error = %e, "invalid pan/tilt configuration");
        std::process::exit(1);
    });
    let acceptor = match &config.tls {
        Some(tls) => Some(tls::load_acceptor(tls).unwrap_or_else(|e| {
            error!(error = %e, "failed to load TLS material");
            std::process::exit(1);
        })),
        None => None,
    };

    let worker = CaptureWorker::spawn(
        camera,
        CaptureSettings::from(&config.camera),
        FrameSlot::new(),
    )
    .unwrap_or_else(|e| {
        error!(error = %e, "failed to start capture");
        std::process::exit(1);
    });

    let state = Arc::new(AppState {
        capture: worker.handle(),
        actuator,
        static_dir: config.server.static_dir.clone(),
        index_file: config.server.index_file.clone(),
    });
    let app = routes::router(state);

    let addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    info!(
        addr,
        camera = %config.camera.driver,
        pantilt = %config.pantilt.driver,
        "gimbal-cam server starting"
    );

    let served = match acceptor {
        Some(acceptor) => tls::serve_tls(listener, acceptor, app, shutdown_signal()).await,
        None => {
            warn!("no [tls] section, serving plain HTTP");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
    };
    if let Err(e) = served {
        error!(error = %e, "server stopped with error");
    }

    stop_capture(worker).await;
    info!("shutdown complete");
}

/// Signal the capture thread and wait for it off the async runtime.
async fn stop_capture(worker: CaptureWorker) {
    worker.stop();
    if tokio::task::spawn_blocking(move || worker.join()).await.is_err() {
        error!("capture join task failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
