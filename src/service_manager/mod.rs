// src/service_manager/mod.rs

//! Name-based directory of services, reachable through the context-manager
//! handle.

pub mod proxy;
pub mod service;

pub use proxy::ServiceManagerProxy;
pub use service::ServiceManager;

/// Interface token every service manager request starts with.
pub const INTERFACE_NAME: &str = "android.os.IServiceManager";

pub const GET_SERVICE_TRANSACTION: u32 = crate::constants::FIRST_CALL_TRANSACTION;
pub const CHECK_SERVICE_TRANSACTION: u32 = crate::constants::FIRST_CALL_TRANSACTION + 1;
pub const ADD_SERVICE_TRANSACTION: u32 = crate::constants::FIRST_CALL_TRANSACTION + 2;
pub const LIST_SERVICES_TRANSACTION: u32 = crate::constants::FIRST_CALL_TRANSACTION + 3;
