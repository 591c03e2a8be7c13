pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod store;
pub mod supervisor;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{StartResponse, StopResponse, serve_stream, start_stream, stop_stream};
pub use app_state::AppState;
pub use config::Config;
pub use error::StreamError;
pub use store::StreamStore;
pub use supervisor::{CommandTemplate, FfmpegHls, StartedStream, Supervisor, TranscodeCommand};

/// HTTP control plane: start, stop and static playback of streams.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/start", post(start_stream))
        .route("/stop/{id}", post(stop_stream))
        .route("/streams/{id}/{*filename}", get(serve_stream))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config)?;
    serve(config, state).await
}

/// Serves `state` until SIGINT/SIGTERM, then stops every running transcoder.
pub async fn serve(config: Config, state: AppState) -> anyhow::Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        %addr,
        public_base_url = %state.public_base_url,
        ffmpeg = %config.ffmpeg_path,
        "HTTP API listening"
    );

    let supervisor = state.supervisor.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
