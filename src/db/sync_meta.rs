// db/sync_meta.rs - Persistence for sync state, conflicts, and the daemon
// heartbeat (C1 tables backing C4/C5/C6). Kept separate from
// `db::queries` (lists/tasks) because these rows aren't part of the
// user-facing data model - they're the sync engine's own bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::db::Store;
use crate::Result;

// ------------------------------------------------------------ sync state --

/// Per-entity ETag/version bookkeeping, scoped by `backend_id` (spec §3
/// "Sync state per backend"). `snapshot` is the last-seen remote payload,
/// used by the conflict resolver to compute "local-unchanged-since-last-sync".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStateRow {
    pub entity_id: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub snapshot: Option<serde_json::Value>,
}

pub async fn get_sync_state(store: &Store, entity_id: &str) -> Result<Option<SyncStateRow>> {
    let row = sqlx::query(
        "SELECT entity_id, etag, last_modified, snapshot FROM sync_state WHERE backend_id = ? AND entity_id = ?",
    )
    .bind(store.backend_id())
    .bind(entity_id)
    .fetch_optional(store.pool())
    .await?;
    row.map(row_to_state).transpose()
}

pub async fn upsert_sync_state(
    store: &Store,
    entity_id: &str,
    etag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
    snapshot: Option<&serde_json::Value>,
) -> Result<()> {
    let snapshot_str = snapshot.map(|s| s.to_string());
    sqlx::query(
        r#"
        INSERT INTO sync_state (backend_id, entity_id, etag, last_modified, snapshot)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(backend_id, entity_id) DO UPDATE SET
            etag = excluded.etag,
            last_modified = excluded.last_modified,
            snapshot = excluded.snapshot
        "#,
    )
    .bind(store.backend_id())
    .bind(entity_id)
    .bind(etag)
    .bind(last_modified)
    .bind(snapshot_str)
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn delete_sync_state(store: &Store, entity_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM sync_state WHERE backend_id = ? AND entity_id = ?")
        .bind(store.backend_id())
        .bind(entity_id)
        .execute(store.pool())
        .await?;
    Ok(())
}

fn row_to_state(row: sqlx::sqlite::SqliteRow) -> Result<SyncStateRow> {
    let snapshot: Option<String> = row.try_get("snapshot")?;
    Ok(SyncStateRow {
        entity_id: row.try_get("entity_id")?,
        etag: row.try_get("etag")?,
        last_modified: row.try_get("last_modified")?,
        snapshot: snapshot.map(|s| serde_json::from_str(&s)).transpose()?,
    })
}

/// Per-backend last successful sync instant + last error (spec §3).
pub async fn get_last_sync(store: &Store) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(Option<DateTime<Utc>>,)> =
        sqlx::query_as("SELECT last_sync FROM backend_sync_meta WHERE backend_id = ?")
            .bind(store.backend_id())
            .fetch_optional(store.pool())
            .await?;
    Ok(row.and_then(|(v,)| v))
}

pub async fn record_sync_attempt(store: &Store, now: DateTime<Utc>, error: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO backend_sync_meta (backend_id, last_sync, last_error)
        VALUES (?, ?, ?)
        ON CONFLICT(backend_id) DO UPDATE SET
            last_sync = excluded.last_sync,
            last_error = excluded.last_error
        "#,
    )
    .bind(store.backend_id())
    .bind(now)
    .bind(error)
    .execute(store.pool())
    .await?;
    Ok(())
}

// -------------------------------------------------------------- conflicts --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStatus {
    Pending,
    ResolvedServer,
    ResolvedLocal,
    ResolvedMerge,
    ResolvedKeepBoth,
}

impl ConflictStatus {
    fn as_str(self) -> &'static str {
        match self {
            ConflictStatus::Pending => "pending",
            ConflictStatus::ResolvedServer => "resolved-server",
            ConflictStatus::ResolvedLocal => "resolved-local",
            ConflictStatus::ResolvedMerge => "resolved-merge",
            ConflictStatus::ResolvedKeepBoth => "resolved-keep-both",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "resolved-server" => ConflictStatus::ResolvedServer,
            "resolved-local" => ConflictStatus::ResolvedLocal,
            "resolved-merge" => ConflictStatus::ResolvedMerge,
            "resolved-keep-both" => ConflictStatus::ResolvedKeepBoth,
            _ => ConflictStatus::Pending,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, ConflictStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub local_version: serde_json::Value,
    pub remote_version: serde_json::Value,
    pub local_modified: DateTime<Utc>,
    pub remote_modified: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
    pub strategy: Option<String>,
}

pub async fn create_conflict(
    store: &Store,
    task_id: Uuid,
    local_version: &serde_json::Value,
    remote_version: &serde_json::Value,
    local_modified: DateTime<Utc>,
    remote_modified: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ConflictRecord> {
    let record = ConflictRecord {
        id: Uuid::new_v4(),
        task_id,
        local_version: local_version.clone(),
        remote_version: remote_version.clone(),
        local_modified,
        remote_modified,
        detected_at: now,
        status: ConflictStatus::Pending,
        strategy: None,
    };
    sqlx::query(
        r#"
        INSERT INTO conflicts (
            id, task_id, backend_id, local_version, remote_version,
            local_modified, remote_modified, detected_at, status, strategy
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.task_id.to_string())
    .bind(store.backend_id())
    .bind(record.local_version.to_string())
    .bind(record.remote_version.to_string())
    .bind(record.local_modified)
    .bind(record.remote_modified)
    .bind(record.detected_at)
    .bind(record.status.as_str())
    .bind(&record.strategy)
    .execute(store.pool())
    .await?;
    Ok(record)
}

pub async fn get_conflict(store: &Store, id: Uuid) -> Result<Option<ConflictRecord>> {
    let row = sqlx::query("SELECT * FROM conflicts WHERE backend_id = ? AND id = ?")
        .bind(store.backend_id())
        .bind(id.to_string())
        .fetch_optional(store.pool())
        .await?;
    row.map(|r| row_to_conflict(&r)).transpose()
}

pub async fn list_conflicts(store: &Store, pending_only: bool) -> Result<Vec<ConflictRecord>> {
    let sql = if pending_only {
        "SELECT * FROM conflicts WHERE backend_id = ? AND status = 'pending' ORDER BY detected_at"
    } else {
        "SELECT * FROM conflicts WHERE backend_id = ? ORDER BY detected_at"
    };
    let rows = sqlx::query(sql).bind(store.backend_id()).fetch_all(store.pool()).await?;
    rows.iter().map(row_to_conflict).collect()
}

/// Mark a conflict resolved. Idempotent: resolving an already-resolved
/// conflict with the same or a different strategy is a no-op write that
/// still returns `Ok` (spec §4.5 "re-resolving an already-resolved
/// conflict is a no-op").
pub async fn resolve_conflict(store: &Store, id: Uuid, status: ConflictStatus, strategy: &str) -> Result<()> {
    sqlx::query("UPDATE conflicts SET status = ?, strategy = ? WHERE backend_id = ? AND id = ? AND status = 'pending'")
        .bind(status.as_str())
        .bind(strategy)
        .bind(store.backend_id())
        .bind(id.to_string())
        .execute(store.pool())
        .await?;
    Ok(())
}

fn row_to_conflict(row: &sqlx::sqlite::SqliteRow) -> Result<ConflictRecord> {
    let id: String = row.try_get("id")?;
    let task_id: String = row.try_get("task_id")?;
    let local_version: String = row.try_get("local_version")?;
    let remote_version: String = row.try_get("remote_version")?;
    let status: String = row.try_get("status")?;
    Ok(ConflictRecord {
        id: Uuid::parse_str(&id).map_err(|e| crate::Error::Internal(e.to_string()))?,
        task_id: Uuid::parse_str(&task_id).map_err(|e| crate::Error::Internal(e.to_string()))?,
        local_version: serde_json::from_str(&local_version)?,
        remote_version: serde_json::from_str(&remote_version)?,
        local_modified: row.try_get("local_modified")?,
        remote_modified: row.try_get("remote_modified")?,
        detected_at: row.try_get("detected_at")?,
        status: ConflictStatus::from_str(&status),
        strategy: row.try_get("strategy")?,
    })
}

// -------------------------------------------------------------- heartbeat --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub pid: i64,
    pub start_time: DateTime<Utc>,
    pub last_beat: DateTime<Utc>,
    pub sync_count: i64,
}

pub async fn write_heartbeat_start(store: &Store, pid: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO heartbeat (id, pid, start_time, last_beat, sync_count)
        VALUES (1, ?, ?, ?, 0)
        ON CONFLICT(id) DO UPDATE SET pid = excluded.pid, start_time = excluded.start_time, last_beat = excluded.last_beat, sync_count = 0
        "#,
    )
    .bind(pid)
    .bind(now)
    .bind(now)
    .execute(store.pool())
    .await?;
    Ok(())
}

pub async fn beat(store: &Store, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE heartbeat SET last_beat = ? WHERE id = 1")
        .bind(now)
        .execute(store.pool())
        .await?;
    Ok(())
}

pub async fn record_sync_completed(store: &Store, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE heartbeat SET last_beat = ?, sync_count = sync_count + 1 WHERE id = 1")
        .bind(now)
        .execute(store.pool())
        .await?;
    Ok(())
}

pub async fn get_heartbeat(store: &Store) -> Result<Option<Heartbeat>> {
    let row: Option<(i64, DateTime<Utc>, DateTime<Utc>, i64)> =
        sqlx::query_as("SELECT pid, start_time, last_beat, sync_count FROM heartbeat WHERE id = 1")
            .fetch_optional(store.pool())
            .await?;
    Ok(row.map(|(pid, start_time, last_beat, sync_count)| Heartbeat {
        pid,
        start_time,
        last_beat,
        sync_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    #[tokio::test]
    async fn sync_state_roundtrips() {
        let (store, _dir) = Store::open_temp("nextcloud").await;
        upsert_sync_state(&store, "task-1", Some("etag-1"), Some(Utc::now()), None).await.unwrap();
        let state = get_sync_state(&store, "task-1").await.unwrap().unwrap();
        assert_eq!(state.etag.as_deref(), Some("etag-1"));
    }

    #[tokio::test]
    async fn conflict_resolution_is_idempotent() {
        let (store, _dir) = Store::open_temp("nextcloud").await;
        let now = Utc::now();
        let record = create_conflict(
            &store,
            Uuid::new_v4(),
            &serde_json::json!({"summary": "Local"}),
            &serde_json::json!({"summary": "Server"}),
            now,
            now,
            now,
        )
        .await
        .unwrap();

        resolve_conflict(&store, record.id, ConflictStatus::ResolvedServer, "server_wins").await.unwrap();
        let reloaded = get_conflict(&store, record.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status.as_str(), "resolved-server");

        // Re-resolving is a no-op: status stays server-side, never flips.
        resolve_conflict(&store, record.id, ConflictStatus::ResolvedLocal, "local_wins").await.unwrap();
        let reloaded_again = get_conflict(&store, record.id).await.unwrap().unwrap();
        assert_eq!(reloaded_again.status.as_str(), "resolved-server");
    }

    #[tokio::test]
    async fn heartbeat_tracks_sync_count() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        write_heartbeat_start(&store, 1234, Utc::now()).await.unwrap();
        record_sync_completed(&store, Utc::now()).await.unwrap();
        record_sync_completed(&store, Utc::now()).await.unwrap();
        let hb = get_heartbeat(&store).await.unwrap().unwrap();
        assert_eq!(hb.sync_count, 2);
        assert_eq!(hb.pid, 1234);
    }
}
