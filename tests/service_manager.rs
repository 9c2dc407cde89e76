// tests/service_manager.rs

mod common;

use rbinder::{Client, DeathRecipient, Object, Server, ServiceManager, ServiceManagerProxy, Status, TransactionData};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

async fn start_service_manager(server: &Server) -> Client {
  let client = common::connect(server).await;
  common::within(client.become_context_manager()).await.unwrap();
  client.set_context_object(Object::local(ServiceManager::new()));
  client.start_thread_pool();
  client
}

async fn start_service(server: &Server, name: &str) -> Client {
  let client = common::connect(server).await;
  client.start_thread_pool();
  let sm = ServiceManagerProxy::new(client.clone());
  common::within(sm.add_service(name, &Object::local(common::Echo), false))
    .await
    .unwrap();
  client
}

#[tokio::test]
async fn registered_service_can_be_found_and_called() -> anyhow::Result<()> {
  let server = common::start_server().await;
  let _sm = start_service_manager(&server).await;
  let _service = start_service(&server, "echo").await;

  let caller = common::connect(&server).await;
  let sm = ServiceManagerProxy::new(caller.clone());
  let echo = common::within(sm.get_service("echo")).await?;
  assert!(!echo.is_local());

  let mut request = TransactionData::new(3);
  request.set_data(&b"ping"[..]);
  let reply = common::within(echo.transact(&caller, request))
    .await?
    .ok_or_else(|| anyhow::anyhow!("echo sent an empty reply"))?;
  assert_eq!(reply.data(), b"ping");

  let checked = common::within(sm.check_service("echo")).await?;
  assert_eq!(checked.as_remote().map(|r| r.handle()), echo.as_remote().map(|r| r.handle()));
  Ok(())
}

#[tokio::test]
async fn lookups_and_duplicates_fail_with_bad_value() {
  let server = common::start_server().await;
  let _sm = start_service_manager(&server).await;
  let service = start_service(&server, "echo").await;

  let sm = ServiceManagerProxy::new(service.clone());
  assert_eq!(
    common::within(sm.add_service("echo", &Object::local(common::Echo), false)).await,
    Err(Status::BadValue)
  );
  assert_eq!(
    common::within(sm.get_service("missing")).await.err(),
    Some(Status::BadValue)
  );
}

#[tokio::test]
async fn services_are_listed_in_name_order() {
  let server = common::start_server().await;
  let _sm = start_service_manager(&server).await;
  let _b = start_service(&server, "bravo").await;
  let _a = start_service(&server, "alpha").await;

  let caller = common::connect(&server).await;
  let names = common::within(ServiceManagerProxy::new(caller).list_services()).await.unwrap();
  assert_eq!(names, vec!["alpha".to_string(), "bravo".to_string()]);
}

#[tokio::test]
async fn owner_gets_its_own_object_back() {
  let server = common::start_server().await;
  let _sm = start_service_manager(&server).await;
  let client = common::connect(&server).await;
  client.start_thread_pool();

  let local = Object::local(common::Echo);
  let sm = ServiceManagerProxy::new(client.clone());
  common::within(sm.add_service("mine", &local, false)).await.unwrap();

  let found = common::within(sm.get_service("mine")).await.unwrap();
  assert!(found.is_local());
  assert_eq!(found.address(), local.address());
}

struct Flag(AtomicBool);

impl DeathRecipient for Flag {
  fn on_object_died(&self, _who: &Object) {
    self.0.store(true, Ordering::SeqCst);
  }
}

#[tokio::test]
async fn dead_services_are_dropped_and_linked_callers_notified() {
  let server = common::start_server().await;
  let _sm = start_service_manager(&server).await;
  let service = start_service(&server, "echo").await;

  let caller = common::connect(&server).await;
  caller.start_thread_pool();
  let sm = ServiceManagerProxy::new(caller.clone());
  let echo = common::within(sm.get_service("echo")).await.unwrap();
  let flag = Arc::new(Flag(AtomicBool::new(false)));
  common::within(echo.link_to_death(&caller, flag.clone())).await.unwrap();

  service.terminate();
  drop(service);

  assert!(common::eventually(|| flag.0.load(Ordering::SeqCst)).await);
  assert_eq!(
    common::within(echo.transact(&caller, TransactionData::new(1))).await,
    Err(Status::DeadObject)
  );

  let mut listed = Vec::new();
  for _ in 0..100 {
    listed = common::within(sm.list_services()).await.unwrap();
    if listed.is_empty() {
      break;
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
  }
  assert!(listed.is_empty());
}
