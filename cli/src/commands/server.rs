use anyhow::{Context as AnyhowContext, Result};
use rbinder::{Server, ServerConfig};

pub async fn run(config: ServerConfig) -> Result<()> {
  let path = config.socket_path.clone();
  let server = Server::bind(config)
    .await
    .with_context(|| format!("Failed to start broker on {}", path.display()))?;
  println!("Broker listening on {}", server.socket_path().display());

  tokio::signal::ctrl_c().await.context("Failed to wait for shutdown signal")?;
  tracing::info!(sessions = server.session_count(), "Shutting down");
  server.stop();
  Ok(())
}
