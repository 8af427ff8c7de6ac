use std::net::SocketAddr;

use anyhow::{Context, Result};
use paddock_core::PaddockConfig;
use paddock_web::{demo, PolicyState};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    info!("Starting paddock demo server...");

    let config = PaddockConfig::from_project_root().unwrap_or_else(|e| {
        warn!("{}, using defaults", e);
        PaddockConfig::default()
    });
    let state = PolicyState::from_config(&config)
        .with_context(|| format!("Failed to load policies from {}", config.policy_dir().display()))?;
    demo::register_demo_policies(&state)?;

    let app = demo::app(&state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
