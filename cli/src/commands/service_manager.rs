use anyhow::{anyhow, Result};
use rbinder::{Client, ClientConfig, Object, ServiceManager};

pub async fn run(config: ClientConfig) -> Result<()> {
  let client = Client::connect(config).await?;
  client
    .become_context_manager()
    .await
    .map_err(|status| anyhow!("Failed to become context manager: {}", status))?;
  client.set_context_object(Object::local(ServiceManager::new()));
  tracing::info!("Service manager running");

  client.start_thread_pool();
  client.join_thread_pool().await;
  Ok(())
}
