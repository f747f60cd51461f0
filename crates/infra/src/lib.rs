//! # Quarry Infra
//!
//! Infrastructure adapters for Quarry: the HTTP transport to the Lattice
//! experimentation service, the resilient client wrapping it with circuit
//! breaking and retry, the batch synchronization engine, and the
//! SQLite-backed sync-state store.

pub mod database;
pub mod sync;

pub use database::{DbManager, SqliteSyncStateStore};
pub use sync::engine::{BatchSyncConfig, BatchSyncEngine, ProgressCallback};
pub use sync::errors::{SyncError, SyncErrorCategory};
pub use sync::lattice_client::{LatticeClient, LatticeClientConfig};
pub use sync::resilient_client::{ResilienceConfig, ResilientClient};
