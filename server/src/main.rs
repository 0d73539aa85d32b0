use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voicebot_endpoint::config::{control_port, media_port};
use voicebot_endpoint::Endpoint;

#[tokio::main]
async fn main() {
    let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let control = format!("0.0.0.0:{}", control_port());
    let media = format!("0.0.0.0:{}", media_port());

    let endpoint = match Endpoint::bind(&control, &media).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("Failed to start endpoint: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Voice endpoint ready: control {}, media {}",
        endpoint.control_addr(),
        endpoint.media_addr()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down with {} open sessions", endpoint.sessions().len());
}
