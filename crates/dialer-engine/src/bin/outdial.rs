//! Outdial server binary
//!
//! Wires configuration from the command line into a [`DialerServer`] and
//! runs the control loops until the process is stopped.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use outdial_dialer_engine::config::{DestinationMode, DialerConfig};
use outdial_dialer_engine::server::DialerServerBuilder;

#[derive(Parser, Debug)]
#[command(name = "outdial", about = "Predictive outbound dialer engine", version)]
struct Args {
    /// Redis URL for the shared state store
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// sqlx URL for the lead/campaign store
    #[arg(long, default_value = "sqlite:outdial.db?mode=rwc")]
    database_url: String,

    /// FreeSWITCH event socket address
    #[arg(long, default_value = "127.0.0.1:8021")]
    esl_addr: String,

    /// FreeSWITCH event socket password
    #[arg(long, default_value = "ClueCon")]
    esl_password: String,

    /// Dial local `user/<ext>` destinations instead of the external
    /// gateway (agent-to-agent testing)
    #[arg(long)]
    dev_destinations: bool,

    /// Empirical pickup ratio driving the predictive multiplier
    #[arg(long, default_value_t = 0.3)]
    pickup_ratio: f64,

    /// Seconds between dialer ticks
    #[arg(long, default_value_t = 15)]
    tick_interval: u64,
}

#[tokio::main]
async fn main() -> outdial_dialer_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = DialerConfig::default();
    config.store.redis_url = args.redis_url;
    config.database.database_url = args.database_url;
    config.switch.esl_addr = args.esl_addr;
    config.switch.esl_password = args.esl_password;
    if args.dev_destinations {
        config.switch.destination = DestinationMode::Development;
    }
    config.dialing.pickup_ratio = args.pickup_ratio;
    config.dialing.tick_interval_secs = args.tick_interval;

    info!(
        "Starting outdial (store {}, switch {})",
        config.store.redis_url, config.switch.esl_addr
    );

    let mut server = DialerServerBuilder::new().with_config(config).build().await?;
    server.start().await?;
    server.run().await
}
