//! LightWise stream connector - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// LightWise stream connector
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via LIGHTWISE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Broadcast endpoint, overriding the configured one
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Send one simulated motion event once connected
    #[arg(long)]
    simulate_motion: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any wss:// connection
    lightwise_ws::init_crypto();

    let args = Args::parse();

    lightwise_telemetry::init_logging()?;

    info!("Starting LightWise v{}", env!("CARGO_PKG_VERSION"));

    let config_path = lightwise_app::AppConfig::resolve_path(args.config);
    info!(config_path = %config_path, "Loading configuration");

    let mut config = lightwise_app::AppConfig::load(&config_path)?;
    if args.endpoint.is_some() {
        config.stream.endpoint = args.endpoint;
    }
    info!(
        endpoint = ?config.stream.endpoint,
        mock_telemetry = config.telemetry.is_mock(),
        dashboard = config.dashboard.enabled,
        "Configuration loaded"
    );

    let app = lightwise_app::Application::new(config)?.with_simulated_motion(args.simulate_motion);
    app.run().await?;

    Ok(())
}
