// tests/common.rs
#![allow(dead_code)]

use async_trait::async_trait;
use rbinder::{Client, ClientConfig, Server, ServerConfig, Status, TransactionData, TransactionHandler};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::Duration;

static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

static TRACING_INIT: Once = Once::new();

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(200);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "rbinder=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

// Unique per test so tests can run in parallel.
pub fn unique_socket_path() -> PathBuf {
  let pid = std::process::id();
  let count = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
  PathBuf::from(format!("/tmp/rbinder_test_{}_{}.sock", pid, count))
}

pub async fn start_server() -> Server {
  setup_tracing();
  Server::bind(ServerConfig::new(unique_socket_path()))
    .await
    .expect("Failed to start test broker")
}

pub async fn connect(server: &Server) -> Client {
  Client::connect(ClientConfig::new(server.socket_path()).with_num_workers(4))
    .await
    .expect("Failed to connect test client")
}

/// Awaits `fut`, failing the test if it takes longer than [`LONG_TIMEOUT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
  tokio::time::timeout(LONG_TIMEOUT, fut)
    .await
    .expect("Operation did not complete in time")
}

/// Polls `check` until it holds or [`LONG_TIMEOUT`] passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + LONG_TIMEOUT;
  while tokio::time::Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  check()
}

/// Replies with the request's data under the request's code.
pub struct Echo;

#[async_trait]
impl TransactionHandler for Echo {
  async fn on_transact(&self, _client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status> {
    let mut reply = TransactionData::new(request.code());
    reply.set_data(request.data());
    Ok(Some(reply))
  }
}
