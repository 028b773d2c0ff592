//! Arena headless - room server on a bare WebSocket listener.

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Voxel Arena headless v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Map weight: {} (ground at {})", config.room.map_weight, config.room.ground_weight);
    info!("  Slots: {} players + {} bots", config.room.players, config.room.bots);

    // Start the WebSocket-only server
    server::run(config).await?;

    Ok(())
}
