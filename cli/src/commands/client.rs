use crate::cli::ClientArgs;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rbinder::{Client, ClientConfig, Object, ParcelWriter, ServiceManagerProxy, Status, TransactionData, TransactionHandler};

/// Demo service that refuses every call.
struct TestService;

#[async_trait]
impl TransactionHandler for TestService {
  async fn on_transact(&self, _client: &Client, request: TransactionData) -> Result<Option<TransactionData>, Status> {
    tracing::info!(code = request.code(), "Demo service called");
    Err(Status::FdsNotAllowed)
  }
}

pub async fn run(config: ClientConfig, args: &ClientArgs) -> Result<()> {
  let client = Client::connect(config).await?;
  let sm = ServiceManagerProxy::new(client.clone());

  if args.service {
    sm.add_service(&args.name, &Object::local(TestService), false)
      .await
      .map_err(|status| anyhow!("Failed to register '{}': {}", args.name, status))?;
    println!("Registered service '{}'", args.name);
    client.start_thread_pool();
    client.join_thread_pool().await;
    return Ok(());
  }

  let object = sm
    .get_service(&args.name)
    .await
    .map_err(|status| anyhow!("Failed to access object '{}': {}", args.name, status))?;
  let request = ParcelWriter::new(3).finish();
  let status = match object.transact(&client, request).await {
    Ok(_) => Status::Ok,
    Err(status) => status,
  };
  println!("Received reply from service: {}", status);
  client.terminate();
  Ok(())
}
