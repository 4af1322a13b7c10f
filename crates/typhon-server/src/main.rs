use anyhow::Result;
use tracing::info;

mod config;
mod server;
mod telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    info!("typhon starting");
    info!("version: {}", env!("CARGO_PKG_VERSION"));

    let config = config::AppConfig::from_env()?;
    config.log_config();

    server::start(config).await
}
