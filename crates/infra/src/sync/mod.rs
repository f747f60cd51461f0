//! Resilient synchronization against the remote experimentation service
//!
//! Layering, innermost first: `lattice_client` speaks HTTP and classifies
//! wire failures; `resilient_client` wraps every typed operation with
//! circuit-breaker gating and retry; `engine` drives many resilient calls
//! across a work list of datasets with bounded concurrency and persisted,
//! resumable progress.

pub mod engine;
pub mod errors;
pub mod lattice_client;
pub mod resilient_client;

pub use engine::{BatchSyncConfig, BatchSyncEngine};
pub use errors::{SyncError, SyncErrorCategory};
pub use lattice_client::{LatticeClient, LatticeClientConfig};
pub use resilient_client::{ResilienceConfig, ResilientClient};
