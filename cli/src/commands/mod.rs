pub mod client;
pub mod monitor;
pub mod server;
pub mod service;
pub mod service_manager;
