//! SQLite-backed persistence for sync state

pub mod manager;
pub mod sync_state_repository;

pub use manager::DbManager;
pub use sync_state_repository::SqliteSyncStateStore;
