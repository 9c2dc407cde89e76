mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use rbinder::{ClientConfig, ServerConfig};
use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV: &str = "BINDER_LOG_LEVEL";

fn setup_tracing() {
  let filter = std::env::var(LOG_LEVEL_ENV)
    .ok()
    .and_then(|level| EnvFilter::try_new(level).ok())
    .or_else(|| EnvFilter::try_from_default_env().ok())
    .unwrap_or_else(|| EnvFilter::new("warn"));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
  setup_tracing();
  let cli_args = Cli::parse();

  let client_config = || match &cli_args.socket_path {
    Some(path) => ClientConfig::new(path),
    None => ClientConfig::default(),
  };

  match &cli_args.command {
    Commands::Server(args) => {
      let mut config = match &cli_args.socket_path {
        Some(path) => ServerConfig::new(path),
        None => ServerConfig::default(),
      };
      config = config.with_socket_mode(args.mode);
      commands::server::run(config).await
    }
    Commands::ServiceManager => commands::service_manager::run(client_config()).await,
    Commands::Service(args) => commands::service::run(client_config(), args).await,
    Commands::Monitor(args) => commands::monitor::run(client_config(), args).await,
    Commands::Client(args) => commands::client::run(client_config(), args).await,
  }
}
