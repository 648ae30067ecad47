// queue/mod.rs - Durable operation queue with atomic claim protocol (C3)
//
// An append-only table read in FIFO order. Enqueue happens inside the same
// local transaction as the mutation it describes (the caller begins one
// `sqlx::Transaction` and passes it to both the `db::queries` write and
// `OperationQueue::enqueue_in_tx`), so a user-visible success implies a
// durable queue entry. The atomic claim protocol (§4.3) is the sole
// mechanism preventing double execution when a CLI's auto-sync and the
// daemon race for the same entry; no external lock is required.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use crate::db::Store;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    CreateTask,
    UpdateTask,
    DeleteTask,
    CreateList,
    UpdateList,
    DeleteList,
}

impl OpKind {
    fn as_str(self) -> &'static str {
        match self {
            OpKind::CreateTask => "create_task",
            OpKind::UpdateTask => "update_task",
            OpKind::DeleteTask => "delete_task",
            OpKind::CreateList => "create_list",
            OpKind::UpdateList => "update_list",
            OpKind::DeleteList => "delete_list",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "create_task" => OpKind::CreateTask,
            "update_task" => OpKind::UpdateTask,
            "delete_task" => OpKind::DeleteTask,
            "create_list" => OpKind::CreateList,
            "update_list" => OpKind::UpdateList,
            "delete_list" => OpKind::DeleteList,
            other => return Err(Error::Internal(format!("unknown op kind: {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: i64,
    pub backend_id: String,
    pub kind: OpKind,
    pub payload: serde_json::Value,
    pub detected_at: DateTime<Utc>,
    pub claim_owner: Option<i64>,
    pub claim_expires_at: Option<DateTime<Utc>>,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub status: EntryStatus,
}

fn row_to_entry(row: &SqliteRow) -> Result<QueueEntry> {
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    Ok(QueueEntry {
        id: row.try_get("id")?,
        backend_id: row.try_get("backend_id")?,
        kind: OpKind::from_str(&kind)?,
        payload: serde_json::from_str(&payload)?,
        detected_at: row.try_get("detected_at")?,
        claim_owner: row.try_get("claim_owner")?,
        claim_expires_at: row.try_get("claim_expires_at")?,
        attempt_count: row.try_get("attempt_count")?,
        last_error: row.try_get("last_error")?,
        status: if status == "failed" {
            EntryStatus::Failed
        } else {
            EntryStatus::Pending
        },
    })
}

/// Default lease length for a claim; entries whose claim has expired
/// (crashed worker, killed daemon) are reclaimable per spec §4.3/§4.6.
pub const DEFAULT_CLAIM_TTL_SECS: i64 = 120;

#[derive(Clone)]
pub struct OperationQueue {
    store: Store,
}

impl OperationQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append an entry inside the caller's transaction.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        backend_id: &str,
        kind: OpKind,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let payload_str = serde_json::to_string(payload)?;
        let result = sqlx::query(
            r#"
            INSERT INTO operation_queue (backend_id, kind, payload, detected_at, attempt_count, status)
            VALUES (?, ?, ?, ?, 0, 'pending')
            "#,
        )
        .bind(backend_id)
        .bind(kind.as_str())
        .bind(payload_str)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Append an entry in its own transaction, for callers that don't need
    /// to share a transaction with a local-store write (e.g. daemon-internal
    /// re-enqueue after conflict resolution).
    pub async fn enqueue(
        &self,
        backend_id: &str,
        kind: OpKind,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let mut tx = self.store.pool().begin().await?;
        let id = self.enqueue_in_tx(&mut tx, backend_id, kind, payload, now).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Atomically claim the lowest-sequence unclaimed-or-expired entry for
    /// `backend_id`. `claim_owner` is typically the worker's pid.
    pub async fn claim_next(
        &self,
        backend_id: &str,
        claim_owner: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut tx = self.store.pool().begin().await?;

        let candidate = sqlx::query(
            r#"
            SELECT * FROM operation_queue
            WHERE backend_id = ? AND status = 'pending'
              AND (claim_owner IS NULL OR claim_expires_at < ?)
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(backend_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut entry = row_to_entry(&row)?;

        let claim_expires_at = now + ChronoDuration::seconds(DEFAULT_CLAIM_TTL_SECS);
        sqlx::query(
            "UPDATE operation_queue SET claim_owner = ?, claim_expires_at = ? WHERE id = ?",
        )
        .bind(claim_owner)
        .bind(claim_expires_at)
        .bind(entry.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        entry.claim_owner = Some(claim_owner);
        entry.claim_expires_at = Some(claim_expires_at);
        Ok(Some(entry))
    }

    /// Successful push: delete the entry.
    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM operation_queue WHERE id = ?")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Retryable failure: clear the claim and bump the attempt count so the
    /// entry becomes eligible again once its claim would have expired anyway,
    /// or immediately for a fresh claimer (spec doesn't mandate a separate
    /// backoff window beyond claim-expiry; the daemon's sync ticker interval
    /// provides natural spacing between attempts).
    pub async fn release_for_retry(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE operation_queue
            SET claim_owner = NULL, claim_expires_at = NULL,
                attempt_count = attempt_count + 1, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Terminal failure: mark failed and leave for operator inspection; does
    /// not block successors because `claim_next` only ever considers
    /// `status = 'pending'` rows.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE operation_queue
            SET status = 'failed', claim_owner = NULL, claim_expires_at = NULL, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Drop all non-in-flight entries (no live, unexpired claim) for any backend.
    pub async fn clear(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM operation_queue WHERE claim_owner IS NULL OR claim_expires_at < ?",
        )
        .bind(now)
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_for_backend(&self, backend_id: &str) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query("SELECT * FROM operation_queue WHERE backend_id = ? ORDER BY id ASC")
            .bind(backend_id)
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn all(&self) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query("SELECT * FROM operation_queue ORDER BY id ASC")
            .fetch_all(self.store.pool())
            .await?;
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    async fn queue() -> (OperationQueue, tempfile::TempDir) {
        let (store, dir) = Store::open_temp("sqlite").await;
        (OperationQueue::new(store), dir)
    }

    #[tokio::test]
    async fn enqueue_and_claim_roundtrip() {
        let (q, _dir) = queue().await;
        let now = Utc::now();
        let id = q
            .enqueue("sqlite", OpKind::CreateTask, &serde_json::json!({"summary": "hi"}), now)
            .await
            .unwrap();

        let claimed = q.claim_next("sqlite", 42, now).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.claim_owner, Some(42));

        // A second claimer sees nothing while the claim is live.
        assert!(q.claim_next("sqlite", 99, now).await.unwrap().is_none());

        q.complete(id).await.unwrap();
        assert!(q.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_claim_is_reclaimable() {
        let (q, _dir) = queue().await;
        let now = Utc::now();
        q.enqueue("sqlite", OpKind::CreateTask, &serde_json::json!({}), now)
            .await
            .unwrap();
        q.claim_next("sqlite", 1, now).await.unwrap().unwrap();

        let later = now + ChronoDuration::seconds(DEFAULT_CLAIM_TTL_SECS + 1);
        let reclaimed = q.claim_next("sqlite", 2, later).await.unwrap().unwrap();
        assert_eq!(reclaimed.claim_owner, Some(2));
    }

    #[tokio::test]
    async fn concurrent_claimers_never_double_process() {
        let (q, _dir) = queue().await;
        let now = Utc::now();
        for _ in 0..20 {
            q.enqueue("sqlite", OpKind::CreateTask, &serde_json::json!({}), now)
                .await
                .unwrap();
        }

        let q1 = q.clone();
        let q2 = q.clone();
        let worker = |q: OperationQueue, owner: i64| async move {
            let mut claimed = Vec::new();
            loop {
                match q.claim_next("sqlite", owner, Utc::now()).await.unwrap() {
                    Some(entry) => {
                        claimed.push(entry.id);
                        q.complete(entry.id).await.unwrap();
                    }
                    None => break,
                }
            }
            claimed
        };

        let (a, b) = tokio::join!(
            tokio::spawn(worker(q1, 1)),
            tokio::spawn(worker(q2, 2)),
        );
        let mut all_ids = a.unwrap();
        all_ids.extend(b.unwrap());
        all_ids.sort();
        all_ids.dedup();
        assert_eq!(all_ids.len(), 20);
    }

    #[tokio::test]
    async fn clear_leaves_in_flight_entries_untouched() {
        let (q, _dir) = queue().await;
        let now = Utc::now();
        let claimed_id = q
            .enqueue("sqlite", OpKind::CreateTask, &serde_json::json!({}), now)
            .await
            .unwrap();
        q.enqueue("sqlite", OpKind::CreateTask, &serde_json::json!({}), now)
            .await
            .unwrap();

        q.claim_next("sqlite", 1, now).await.unwrap();
        let cleared = q.clear(now).await.unwrap();
        assert_eq!(cleared, 1);

        let remaining = q.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, claimed_id);
    }
}
