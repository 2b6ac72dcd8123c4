/// OneLight - multi-user smart plug control
///
/// Serves the device API for plugs on the local network.

use onelight::{
    config::{LoggingConfig, ServerConfig},
    context::AppContext,
    error::OneLightResult,
    server,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> OneLightResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    init_logging(&config.logging);

    print_banner();
    tracing::info!("Device backend: {:?}", config.devices.backend);

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn print_banner() {
    println!(
        r#"
   ___             _     _       _     _
  / _ \ _ __   ___| |   (_) __ _| |__ | |_
 | | | | '_ \ / _ \ |   | |/ _` | '_ \| __|
 | |_| | | | |  __/ |___| | (_| | | | | |_
  \___/|_| |_|\___|_____|_|\__, |_| |_|\__|
                           |___/
        Smart plug control v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
