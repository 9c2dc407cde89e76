use crate::cli::MonitorArgs;
use anyhow::{anyhow, Result};
use rbinder::{Client, ClientConfig, LogMessageHandler, Message};
use std::sync::Arc;

struct MonitorPrinter {
  payload: bool,
}

impl LogMessageHandler for MonitorPrinter {
  fn on_log_message(&self, msg: Message) {
    if self.payload && !msg.payload().is_empty() {
      println!("{} {}", msg, hex::encode(msg.payload()));
    } else {
      println!("{}", msg);
    }
  }
}

pub async fn run(config: ClientConfig, args: &MonitorArgs) -> Result<()> {
  let client = Client::connect(config).await?;
  client
    .become_monitor()
    .await
    .map_err(|status| anyhow!("Failed to enable monitor mode: {}", status))?;
  client.set_log_message_handler(Arc::new(MonitorPrinter { payload: args.payload }));

  client.start_thread_pool();
  client.join_thread_pool().await;
  Ok(())
}
