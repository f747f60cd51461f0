//! # Quarry Core
//!
//! Ports and pure domain services for Quarry.
//!
//! This crate defines the seams the infrastructure layer plugs into:
//! - `sync::ports`: the remote experiment transport boundary and the
//!   persisted sync-state store
//! - `patterns`: pure pattern extraction from fetched experiment results
//!
//! No I/O happens here; implementations live in `quarry-infra`.

pub mod patterns;
pub mod sync;

pub use patterns::{PatternExtractor, PatternThresholds};
pub use sync::ports::{ExperimentTransport, ResultPage, SyncStateStore, TransportError};
