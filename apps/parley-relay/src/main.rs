use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;

use parley_relay::{
    cli::{self, Cli, Commands},
    config::Config,
    telemetry::Telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;
    let cli = Cli::parse();

    if let Some(Commands::Probe {
        url,
        user_id,
        offer_to,
        seconds,
    }) = cli.command
    {
        return cli::run_probe(url, user_id, offer_to, seconds).await;
    }

    let config = Config::from_env();
    info!(
        listen_addr = %config.listen_addr(),
        uploads = config.upload_url.is_some(),
        "starting parley relay"
    );

    parley_relay::serve(config, Some(telemetry.metrics_handle()), shutdown_signal()).await
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
