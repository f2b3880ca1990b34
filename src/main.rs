//! mqtt-slack-bridge
//!
//! Usage:
//!   mqtt-slack-bridge
//!
//! Settings are read from `config.toml` in the working directory, or from
//! the file named by `BRIDGE_CONFIG`. `BRIDGE__<SECTION>__<KEY>` variables
//! override individual settings. `RUST_LOG` overrides `[log] level`.

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mqtt_slack_bridge::config::Config;
use mqtt_slack_bridge::supervisor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = Config::default_path();
    let config = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Loaded configuration from {:?}", config_path);
    info!(
        "  Broker: {} topic '{}'",
        config.broker.socket_address(),
        config.broker.topic
    );
    info!("  Chat: channel '{}'", config.chat.channel);
    info!("  Relay: queue capacity {}", config.relay.queue_capacity);

    let e = supervisor::run(config).await;
    error!("{}", e);
    std::process::exit(1);
}
