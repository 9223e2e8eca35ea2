mod config;
mod error;
mod formats;
mod server;
mod temp;
mod tool;

use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::error::ApiError;
use crate::server::AppState;
use crate::tool::ToolRunner;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mediabridge=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Could not create temp dir: {error}")))?;

    let state = AppState {
        temp_dir: config.temp_dir.clone(),
        production: config.production,
        tool: Arc::new(ToolRunner::new(config.tool.clone())),
    };

    let sweeper = temp::spawn_sweeper(config.temp_dir.clone());

    let cors = server::build_cors_layer(&config.allowed_origins)?;
    let app = server::build_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
        })?;

    info!("Server running on http://{}", config.bind_addr);
    info!("Environment: {}", config.environment());

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")));

    // Shutdown hook: the sweep timer stops with the server.
    sweeper.abort();

    result
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
