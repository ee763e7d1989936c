//! Open-interest tracker for exchange index option chains.
//!
//! Acquires chain snapshots through a shared headless browser session
//! (network interception first, rendered table second), reconciles each
//! against the last stored snapshot, and persists only material changes.

pub mod acquire;
pub mod api;
pub mod config;
pub mod model;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod store;

pub use model::{PersistedRecord, Reconciliation, Snapshot, Symbol};
pub use service::OiService;
