use clap::Parser;
use tokio::net::TcpListener;

use web_bluetooth_bridge::{btle::BtleplugBackend, server, Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  pretty_env_logger::formatted_builder()
    .filter_level(cli.log_level())
    .parse_default_env()
    .init();
  log::info!("Starting bridge | debug={}", cli.debug);

  let backend = BtleplugBackend::new(cli.adapter).await?;
  let listener = TcpListener::bind(cli.listen_addr()).await?;
  server::serve(listener, &backend, &backend, &cli.bridge_config()).await
}
