//! SQLite implementation of the sync-state store
//!
//! One row per dataset, written by the batch sync engine after every page
//! and at terminal transitions. Survives process restart so interrupted
//! runs resume from their persisted cursor. The upsert never moves
//! `last_synced_at` backwards, even if a caller hands in a stale record.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::sync::ports::SyncStateStore;
use quarry_domain::{QuarryError, Result as DomainResult, SyncState, SyncStatus};
use rusqlite::{params, Row};
use tokio::task;

use super::manager::{map_sql_error, DbConnection, DbManager};

/// SQLite-backed [`SyncStateStore`].
pub struct SqliteSyncStateStore {
    db: Arc<DbManager>,
}

impl SqliteSyncStateStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncStateStore for SqliteSyncStateStore {
    async fn load(&self, dataset_id: &str) -> DomainResult<Option<SyncState>> {
        let db = Arc::clone(&self.db);
        let dataset_id = dataset_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<SyncState>> {
            let conn = db.get_connection()?;
            query_state(&conn, &dataset_id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn upsert(&self, state: &SyncState) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let state = state.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            upsert_state(&conn, &state)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn reset(&self, dataset_id: &str) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let dataset_id = dataset_id.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM sync_state WHERE dataset_id = ?1", params![dataset_id])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_all(&self) -> DomainResult<Vec<SyncState>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<SyncState>> {
            let conn = db.get_connection()?;
            query_all_states(&conn)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn query_state(conn: &DbConnection, dataset_id: &str) -> DomainResult<Option<SyncState>> {
    let sql = "SELECT dataset_id, cursor, last_synced_at, status, retry_count, last_error
               FROM sync_state
               WHERE dataset_id = ?1";

    let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
    let mut rows = stmt
        .query_map(params![dataset_id], map_sync_state_row)
        .map_err(map_sql_error)?;

    match rows.next() {
        Some(row) => Ok(Some(row.map_err(map_sql_error)?)),
        None => Ok(None),
    }
}

fn upsert_state(conn: &DbConnection, state: &SyncState) -> DomainResult<()> {
    let now = Utc::now().timestamp();
    let synced_at = state.last_synced_at.map(|ts| ts.timestamp());

    conn.execute(
        "INSERT INTO sync_state (dataset_id, cursor, last_synced_at, status, retry_count,
                                 last_error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(dataset_id) DO UPDATE SET
             cursor = excluded.cursor,
             last_synced_at = CASE
                 WHEN excluded.last_synced_at IS NULL THEN sync_state.last_synced_at
                 WHEN sync_state.last_synced_at IS NULL THEN excluded.last_synced_at
                 ELSE MAX(sync_state.last_synced_at, excluded.last_synced_at)
             END,
             status = excluded.status,
             retry_count = excluded.retry_count,
             last_error = excluded.last_error,
             updated_at = excluded.updated_at",
        params![
            state.dataset_id,
            state.cursor as i64,
            synced_at,
            state.status.to_string(),
            state.retry_count,
            state.last_error,
            now,
        ],
    )
    .map_err(map_sql_error)?;

    Ok(())
}

fn query_all_states(conn: &DbConnection) -> DomainResult<Vec<SyncState>> {
    let sql = "SELECT dataset_id, cursor, last_synced_at, status, retry_count, last_error
               FROM sync_state
               ORDER BY dataset_id";

    let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
    let rows = stmt.query_map(params![], map_sync_state_row).map_err(map_sql_error)?;

    let mut states = Vec::new();
    for row in rows {
        states.push(row.map_err(map_sql_error)?);
    }
    Ok(states)
}

fn map_sync_state_row(row: &Row<'_>) -> rusqlite::Result<SyncState> {
    let status_str: String = row.get(3)?;
    let status = SyncStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    let synced_secs: Option<i64> = row.get(2)?;
    let last_synced_at = synced_secs.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    let cursor: i64 = row.get(1)?;

    Ok(SyncState {
        dataset_id: row.get(0)?,
        cursor: cursor.max(0) as u64,
        last_synced_at,
        status,
        retry_count: row.get(4)?,
        last_error: row.get(5)?,
    })
}

fn map_join_error(err: task::JoinError) -> QuarryError {
    if err.is_cancelled() {
        QuarryError::Internal("blocking task cancelled".into())
    } else {
        QuarryError::Internal(format!("blocking task failed: {err}"))
    }
}

// ============================================================================
// Tests
// ============================================================================
