pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod models;
#[cfg(feature = "postgres")]
pub mod schema;
pub mod service;
pub mod store;
pub mod sweeper;

pub use error::{LedgerError, LedgerResult};
pub use service::{InventoryService, ServiceConfig};
