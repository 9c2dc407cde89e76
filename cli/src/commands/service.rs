use crate::cli::ServiceArgs;
use anyhow::{anyhow, bail, Result};
use rbinder::{Client, ClientConfig, ServiceManagerProxy};

pub async fn run(config: ClientConfig, args: &ServiceArgs) -> Result<()> {
  if !args.list {
    bail!("No valid action specified");
  }
  let client = Client::connect(config).await?;
  let sm = ServiceManagerProxy::new(client.clone());
  let services = sm
    .list_services()
    .await
    .map_err(|status| anyhow!("Failed to retrieve available services: {}", status))?;

  println!("Found {} services:", services.len());
  for (n, service) in services.iter().enumerate() {
    println!("{}\t{}", n, service);
  }
  client.terminate();
  Ok(())
}
