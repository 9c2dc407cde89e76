use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "rbinder", version, about = "rbinder Command Line Utility")]
pub struct Cli {
  /// Broker socket (defaults to $BINDER_SOCKET_PATH or /run/binder.sock)
  #[clap(long, short = 's', global = true)]
  pub socket_path: Option<PathBuf>,

  #[clap(subcommand)]
  pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
  /// Run the broker
  Server(ServerArgs),
  /// Run the service manager as context manager
  ServiceManager,
  /// Interact with registered services
  Service(ServiceArgs),
  /// Print every message exchanged over the broker
  Monitor(MonitorArgs),
  /// Run the demo client, or its service side with --service
  Client(ClientArgs),
}

#[derive(Parser, Debug)]
pub struct ServerArgs {
  /// Permission bits for the socket file, in octal
  #[clap(long, default_value = "777", value_parser = parse_mode)]
  pub mode: u32,
}

#[derive(Parser, Debug)]
pub struct ServiceArgs {
  /// List available services
  #[clap(long, action)]
  pub list: bool,
}

#[derive(Parser, Debug)]
pub struct MonitorArgs {
  /// Also dump each message payload as hex
  #[clap(long, action)]
  pub payload: bool,
}

#[derive(Parser, Debug)]
pub struct ClientArgs {
  /// Register the demo service instead of calling it
  #[clap(long, action)]
  pub service: bool,

  /// Name the demo service is registered under
  #[clap(long, default_value = "Foo")]
  pub name: String,
}

fn parse_mode(raw: &str) -> Result<u32, String> {
  u32::from_str_radix(raw.trim_start_matches("0o"), 8).map_err(|e| format!("invalid octal mode '{}': {}", raw, e))
}
