// sync/mod.rs - Sync Manager (C4): the pull/push/conflict/resolve state
// machine described in spec §4.4:
//
//   IDLE -> CONNECTIVITY_PROBE -> PULL -> APPLY_REMOTE
//        -> PUSH_QUEUE -> RESOLVE_CONFLICTS -> COMMIT_STATE -> IDLE
//   (any step may short-circuit to ERROR -> BACKOFF -> IDLE)
//
// One cycle operates on exactly one `(backend_id, backend_handle)` pair:
// `store` is the local cache scoped to that backend id (every query it
// issues is filtered by `backend_id`, per C1), and `remote` is the
// `TaskBackend` adapter for that same logical backend. Pulling remote X
// never touches rows belonging to remote Y even if they share a physical
// SQLite file, because isolation lives in the `backend_id` column, not in
// separate `SyncManager` instances.

pub mod conflict;

use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::backend::TaskBackend;
use crate::config::{ConflictStrategy, MergeFallback, MissingListPolicy, OfflineMode};
use crate::db::{queries, sync_meta, Store};
use crate::model::{List, ListId, Status, Task, TaskId};
use crate::queue::{OpKind, OperationQueue, QueueEntry};
use crate::{Error, Result};

/// Tallies one cycle's effect, echoed back to the caller and (if enabled)
/// the notification log per spec §4.4 "Commit state".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub pulled_new: u64,
    pub pulled_updated: u64,
    pulled_deleted: u64,
    pub pushed: u64,
    pub conflicts_detected: u64,
    pub skipped_unsupported: u64,
    /// `true` when the probe failed and the cycle degraded to queue-only
    /// (spec §4.4 "In `auto`, a failed probe degrades to queue-only").
    pub queue_only: bool,
}

impl SyncSummary {
    pub fn pulled_deleted(&self) -> u64 {
        self.pulled_deleted
    }

    /// The one-line text summary spec §4.4 describes: `"pull: N new, M
    /// updated, K deleted; push: P ops processed"`.
    pub fn describe(&self) -> String {
        format!(
            "pull: {} new, {} updated, {} deleted; push: {} ops processed{}",
            self.pulled_new,
            self.pulled_updated,
            self.pulled_deleted,
            self.pushed,
            if self.conflicts_detected > 0 {
                format!("; {} conflict(s) detected", self.conflicts_detected)
            } else {
                String::new()
            }
        )
    }
}

/// Per-cycle configuration the manager needs from `config::SyncConfig`,
/// passed in rather than borrowing the whole `Config` so tests can
/// construct one without a full config file.
#[derive(Debug, Clone)]
pub struct SyncManagerConfig {
    pub offline_mode: OfflineMode,
    pub connectivity_timeout: Duration,
    pub conflict_resolution: ConflictStrategy,
    pub merge_fallback: MergeFallback,
    pub missing_list_policy: MissingListPolicy,
    pub background_pull_cooldown: Duration,
}

/// Baseline recorded in `sync_state.snapshot` for each synced entity: the
/// local `modified` timestamp at the moment we last reconciled it, used to
/// tell "local changed since last sync" apart from "local untouched" when
/// classifying a pulled remote change (spec §9 "conflict detection without
/// vector clocks": last-known-sync instant plus remote ETag/version token).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Baseline {
    local_modified: chrono::DateTime<Utc>,
}

pub struct SyncManager {
    config: SyncManagerConfig,
    cooldowns: DashMap<String, Instant>,
}

impl SyncManager {
    pub fn new(config: SyncManagerConfig) -> Self {
        Self {
            config,
            cooldowns: DashMap::new(),
        }
    }

    /// Opportunistic-pull gate (spec §4.4 "Background pull cooldown"):
    /// rejects a request within `background_pull_cooldown` of the last
    /// sync *attempt* for this backend. Cooldown state lives only in
    /// memory (spec §9 design note: "a process restart resets cooldowns,
    /// which is acceptable because cooldown only throttles opportunistic
    /// pulls, not correctness").
    pub fn should_pull_now(&self, backend_id: &str) -> bool {
        match self.cooldowns.get(backend_id) {
            Some(last) => last.elapsed() >= self.config.background_pull_cooldown,
            None => true,
        }
    }

    fn note_attempt(&self, backend_id: &str) {
        self.cooldowns.insert(backend_id.to_string(), Instant::now());
    }

    /// Run one full cycle for `remote` against the local cache `store`.
    /// `claim_owner` is typically the caller's pid, used for the queue's
    /// atomic claim protocol (spec §4.3) so CLI auto-sync and the daemon
    /// never double-process the same entry.
    pub async fn run_cycle(
        &self,
        store: &Store,
        queue: &OperationQueue,
        remote: &dyn TaskBackend,
        claim_owner: i64,
    ) -> Result<SyncSummary> {
        self.note_attempt(store.backend_id());
        let now = Utc::now();
        let mut summary = SyncSummary::default();

        let queue_only = match self.probe(remote).await {
            Ok(()) => false,
            Err(e) => match self.config.offline_mode {
                OfflineMode::Online => {
                    let message = e.to_string();
                    sync_meta::record_sync_attempt(store, now, Some(message.as_str())).await?;
                    return Err(e);
                }
                OfflineMode::Auto => true,
                OfflineMode::Offline => true,
            },
        };
        summary.queue_only = queue_only;

        if !queue_only {
            self.pull(store, remote, &mut summary).await?;
        }

        self.push(store, queue, remote, claim_owner, &mut summary).await?;

        sync_meta::record_sync_attempt(store, now, None).await?;
        sync_meta::record_sync_completed(store, now).await?;
        Ok(summary)
    }

    async fn probe(&self, remote: &dyn TaskBackend) -> Result<()> {
        if self.config.offline_mode == OfflineMode::Offline {
            return Err(Error::Network("offline mode: probe skipped".to_string()));
        }
        tokio::time::timeout(self.config.connectivity_timeout, remote.probe())
            .await
            .map_err(|_| Error::Network("connectivity probe timed out".to_string()))?
    }

    // ---------------------------------------------------------------- pull --

    async fn pull(&self, store: &Store, remote: &dyn TaskBackend, summary: &mut SyncSummary) -> Result<()> {
        let remote_lists = remote.get_lists().await?;

        for remote_list in &remote_lists {
            let list_id: ListId = match remote_list.value.uid.parse() {
                Ok(id) => id,
                Err(_) => continue,
            };

            match queries::get_list(store, list_id).await? {
                None => {
                    let now = Utc::now();
                    let list = List {
                        id: list_id,
                        backend_id: store.backend_id().to_string(),
                        name: remote_list.value.name.clone(),
                        color: remote_list.value.color.clone().unwrap_or_else(|| "#808080".to_string()),
                        description: remote_list.value.description.clone(),
                        modified: now,
                        deleted_at: None,
                    };
                    queries::create_list(store.pool(), store.backend_id(), &list).await?;
                    sync_meta::upsert_sync_state(
                        store,
                        &remote_list.value.uid,
                        remote_list.etag.as_deref(),
                        remote_list.last_modified,
                        Some(&serde_json::to_value(&Baseline { local_modified: now })?),
                    )
                    .await?;
                }
                Some(local_list) => {
                    if local_list.name != remote_list.value.name || local_list.description != remote_list.value.description {
                        let mut updated = local_list.clone();
                        updated.name = remote_list.value.name.clone();
                        updated.description = remote_list.value.description.clone();
                        updated.modified = Utc::now();
                        queries::update_list(store, &updated).await?;
                    }
                }
            }

            self.pull_list_tasks(store, remote, &remote_list.value.uid, summary).await?;
        }

        Ok(())
    }

    async fn pull_list_tasks(
        &self,
        store: &Store,
        remote: &dyn TaskBackend,
        list_uid: &str,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let list_id: ListId = match list_uid.parse() {
            Ok(id) => id,
            Err(_) => return Ok(()),
        };
        let remote_tasks = remote.get_tasks(list_uid).await?;
        let local_tasks = queries::get_tasks(store, list_id).await?;

        for remote_task in &remote_tasks {
            let task_id: TaskId = match remote_task.value.uid.parse() {
                Ok(id) => id,
                Err(_) => continue,
            };
            let baseline = sync_meta::get_sync_state(store, &remote_task.value.uid)
                .await?
                .and_then(|s| s.snapshot)
                .and_then(|v| serde_json::from_value::<Baseline>(v).ok());

            match local_tasks.iter().find(|t| t.id == task_id) {
                None => {
                    self.insert_pulled_task(store, list_id, task_id, &remote_task.value).await?;
                    self.record_baseline(store, &remote_task.value.uid, remote_task.etag.as_deref(), remote_task.last_modified)
                        .await?;
                    summary.pulled_new += 1;
                }
                Some(local_task) => {
                    let local_changed_since_sync = baseline
                        .as_ref()
                        .map(|b| local_task.modified > b.local_modified)
                        .unwrap_or(false);
                    let remote_changed =
                        remote_changed_since_last_seen(store, &remote_task.value.uid, remote_task.etag.as_deref(), remote_task.last_modified)
                            .await?;

                    if !remote_changed {
                        continue;
                    }

                    if local_changed_since_sync {
                        let conflict = sync_meta::create_conflict(
                            store,
                            task_id.0,
                            &serde_json::to_value(local_task)?,
                            &serde_json::to_value(remote_task_as_task(&remote_task.value, list_id, store.backend_id()))?,
                            local_task.modified,
                            remote_task.value.modified,
                            Utc::now(),
                        )
                        .await?;
                        tracing::warn!(conflict_id = %conflict.id, task = %task_id, "pull conflict: both sides changed since last sync");
                        summary.conflicts_detected += 1;
                    } else {
                        self.overwrite_local_task(store, local_task.id, &remote_task.value).await?;
                        self.record_baseline(store, &remote_task.value.uid, remote_task.etag.as_deref(), remote_task.last_modified)
                            .await?;
                        summary.pulled_updated += 1;
                    }
                }
            }
        }

        // remote-deleted: local rows whose uid no longer appears upstream.
        let remote_uids: std::collections::HashSet<&str> = remote_tasks.iter().map(|t| t.value.uid.as_str()).collect();
        for local_task in &local_tasks {
            if remote_uids.contains(local_task.id.to_string().as_str()) {
                continue;
            }
            if sync_meta::get_sync_state(store, &local_task.id.to_string()).await?.is_none() {
                // Never synced from this remote; not ours to delete.
                continue;
            }
            let has_pending_local_op = has_pending_mutation_for(store.pool(), store.backend_id(), &local_task.id.to_string()).await?;
            if has_pending_local_op {
                let conflict = sync_meta::create_conflict(
                    store,
                    local_task.id.0,
                    &serde_json::to_value(local_task)?,
                    &serde_json::json!({ "deleted": true }),
                    local_task.modified,
                    Utc::now(),
                    Utc::now(),
                )
                .await?;
                tracing::warn!(conflict_id = %conflict.id, task = %local_task.id, "pull conflict: remote deleted but local has a pending mutation");
                summary.conflicts_detected += 1;
            } else {
                queries::delete_task(store.pool(), store.backend_id(), local_task.id).await?;
                sync_meta::delete_sync_state(store, &local_task.id.to_string()).await?;
                summary.pulled_deleted += 1;
            }
        }

        Ok(())
    }

    async fn insert_pulled_task(&self, store: &Store, list_id: ListId, task_id: TaskId, remote: &crate::backend::RemoteTask) -> Result<()> {
        let task = remote_task_as_task(remote, list_id, store.backend_id());
        let mut task = task;
        task.id = task_id;
        queries::create_task(store.pool(), store.backend_id(), &task).await
    }

    async fn overwrite_local_task(&self, store: &Store, task_id: TaskId, remote: &crate::backend::RemoteTask) -> Result<()> {
        let mut local = queries::get_task_by_id(store, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        local.summary = remote.summary.clone();
        local.description = remote.description.clone();
        let status: Status = remote.status.parse().unwrap_or(local.status);
        local.set_status(status, Utc::now());
        local.priority = remote.priority;
        local.due = remote.due;
        local.start = remote.start;
        local.tags = remote.tags.clone();
        queries::update_task(store.pool(), store.backend_id(), &local).await
    }

    async fn record_baseline(
        &self,
        store: &Store,
        entity_id: &str,
        etag: Option<&str>,
        last_modified: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        let baseline = Baseline { local_modified: Utc::now() };
        sync_meta::upsert_sync_state(store, entity_id, etag, last_modified, Some(&serde_json::to_value(&baseline)?)).await
    }

    // ---------------------------------------------------------------- push --

    async fn push(
        &self,
        store: &Store,
        queue: &OperationQueue,
        remote: &dyn TaskBackend,
        claim_owner: i64,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        loop {
            let now = Utc::now();
            let Some(entry) = queue.claim_next(store.backend_id(), claim_owner, now).await? else {
                break;
            };
            match self.push_one(store, remote, &entry, summary).await {
                Ok(()) => {
                    queue.complete(entry.id).await?;
                    summary.pushed += 1;
                }
                Err(Error::Conflict(msg)) => {
                    self.record_push_conflict(store, remote, &entry, &msg).await?;
                    queue.complete(entry.id).await?;
                    summary.conflicts_detected += 1;
                }
                Err(Error::Unsupported(msg)) => {
                    tracing::warn!(entry = entry.id, "skipping unsupported op: {msg}");
                    queue.mark_failed(entry.id, &msg).await?;
                    summary.skipped_unsupported += 1;
                }
                Err(e) if e.is_retryable() => {
                    queue.release_for_retry(entry.id, &e.to_string()).await?;
                    break;
                }
                Err(e) => {
                    queue.mark_failed(entry.id, &e.to_string()).await?;
                }
            }
        }
        Ok(())
    }

    /// A push precondition failure means the remote version diverged after
    /// this entry was queued (spec §4.4 "a precondition failure means the
    /// remote version diverged ... pushed entry re-queued under a conflict
    /// marker"). Fetch the remote's current state and record a conflict the
    /// same way [`Self::pull_list_tasks`] does, so the queued local mutation
    /// survives as a `ConflictRecord` instead of being silently dropped when
    /// the entry is completed; `sync conflicts resolve` (via
    /// [`Self::resolve_one`]) is what actually re-pushes it.
    async fn record_push_conflict(&self, store: &Store, remote: &dyn TaskBackend, entry: &QueueEntry, msg: &str) -> Result<()> {
        let task: Task = match entry.kind {
            OpKind::CreateTask | OpKind::UpdateTask => serde_json::from_value(entry.payload.clone())?,
            _ => {
                tracing::warn!(entry = entry.id, "push conflict on non-task op: {msg}");
                return Ok(());
            }
        };
        let remote_task = remote
            .get_task(&task.list_id.to_string(), &task.id.to_string())
            .await
            .ok()
            .flatten()
            .map(|e| remote_task_as_task(&e.value, task.list_id, store.backend_id()))
            .unwrap_or_else(|| task.clone());

        let conflict = sync_meta::create_conflict(
            store,
            task.id.0,
            &serde_json::to_value(&task)?,
            &serde_json::to_value(&remote_task)?,
            task.modified,
            remote_task.modified,
            Utc::now(),
        )
        .await?;
        tracing::warn!(conflict_id = %conflict.id, task = %task.id, "push conflict: {msg}");
        Ok(())
    }

    async fn push_one(&self, store: &Store, remote: &dyn TaskBackend, entry: &QueueEntry, _summary: &mut SyncSummary) -> Result<()> {
        match entry.kind {
            OpKind::CreateTask => {
                let task: Task = serde_json::from_value(entry.payload.clone())?;
                let remote_task = local_task_as_remote(&task);
                let created = remote.create_task(&remote_task).await?;
                self.record_baseline(store, &created.value.uid, created.etag.as_deref(), created.last_modified).await?;
                Ok(())
            }
            OpKind::UpdateTask => {
                let task: Task = serde_json::from_value(entry.payload.clone())?;
                let remote_task = local_task_as_remote(&task);
                let precondition = sync_meta::get_sync_state(store, &task.id.to_string()).await?.and_then(|s| s.etag);
                let updated = remote
                    .update_task(&remote_task, precondition.as_deref())
                    .await?;
                self.record_baseline(store, &updated.value.uid, updated.etag.as_deref(), updated.last_modified).await?;
                Ok(())
            }
            OpKind::DeleteTask => {
                let list_id = entry
                    .payload
                    .get("list_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Internal("delete_task payload missing list_id".to_string()))?;
                let task_uid = entry
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Internal("delete_task payload missing id".to_string()))?;
                remote.delete_task(list_id, task_uid).await?;
                sync_meta::delete_sync_state(store, task_uid).await
            }
            OpKind::CreateList => {
                let list: List = serde_json::from_value(entry.payload.clone())?;
                if !remote.capabilities().list_creation {
                    return match self.config.missing_list_policy {
                        MissingListPolicy::Error => Err(Error::Unsupported(format!("{}: list creation unsupported", remote.backend_id()))),
                        MissingListPolicy::SkipWarn => Err(Error::Unsupported(format!("{}: list creation unsupported, skipping", remote.backend_id()))),
                    };
                }
                let remote_list = crate::backend::RemoteList {
                    uid: list.id.to_string(),
                    name: list.name.clone(),
                    color: Some(list.color.clone()),
                    description: list.description.clone(),
                    deleted: false,
                };
                remote.create_list(&remote_list).await?;
                Ok(())
            }
            OpKind::UpdateList => {
                let list: List = serde_json::from_value(entry.payload.clone())?;
                let remote_list = crate::backend::RemoteList {
                    uid: list.id.to_string(),
                    name: list.name.clone(),
                    color: Some(list.color.clone()),
                    description: list.description.clone(),
                    deleted: false,
                };
                remote.update_list(&remote_list, None).await?;
                Ok(())
            }
            OpKind::DeleteList => {
                let uid = entry
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::Internal("delete_list payload missing id".to_string()))?;
                if !remote.capabilities().list_deletion {
                    return Err(Error::Unsupported(format!("{}: list deletion unsupported", remote.backend_id())));
                }
                remote.delete_list(uid).await
            }
        }
    }

    /// Apply the configured default strategy to every currently-pending
    /// conflict for this backend. This is a deliberately separate,
    /// explicit step from [`Self::run_cycle`]: conflicts stay `pending`
    /// after a cycle so an operator's `sync conflicts resolve <uid>
    /// --strategy ...` can choose a strategy other than the configured
    /// default for that specific conflict (spec §4.5 "overridable
    /// per-conflict") without the daemon's next tick having already
    /// resolved it out from under them. A caller that wants hands-off
    /// convergence (e.g. a cron-style daemon tick) calls this right after
    /// `run_cycle`; the CLI's interactive `sync conflicts resolve` calls
    /// [`Self::resolve_one`] directly instead.
    pub async fn resolve_all_pending(&self, store: &Store, queue: &OperationQueue) -> Result<u64> {
        let pending = sync_meta::list_conflicts(store, true).await?;
        let mut resolved = 0;
        for record in pending {
            self.resolve_one(store, queue, record.id, self.config.conflict_resolution).await?;
            resolved += 1;
        }
        Ok(resolved)
    }

    /// Resolve one conflict by id with an explicit strategy (spec §4.5,
    /// CLI `sync conflicts resolve <uid> --strategy ...`). A no-op if the
    /// conflict is already resolved (idempotence).
    pub async fn resolve_one(
        &self,
        store: &Store,
        queue: &OperationQueue,
        conflict_id: uuid::Uuid,
        strategy: ConflictStrategy,
    ) -> Result<()> {
        let record = sync_meta::get_conflict(store, conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if !record.status.is_pending() {
            return Ok(());
        }

        let local: Task = serde_json::from_value(record.local_version.clone())?;
        let remote: Task = serde_json::from_value(record.remote_version.clone())?;
        let remote_etag = sync_meta::get_sync_state(store, &local.id.to_string()).await?.and_then(|s| s.etag);

        let resolution = conflict::resolve(strategy, &local, &remote, remote_etag, self.config.merge_fallback, Utc::now())?;

        match queries::get_task_by_id(store, local.id).await? {
            Some(_) => queries::update_task(store.pool(), store.backend_id(), &resolution.local_task).await?,
            None => queries::create_task(store.pool(), store.backend_id(), &resolution.local_task).await?,
        }

        match resolution.queue_action {
            conflict::QueueAction::Discard => {}
            conflict::QueueAction::RequeueUpdate { precondition_etag } => {
                if let Some(etag) = &precondition_etag {
                    sync_meta::upsert_sync_state(store, &resolution.local_task.id.to_string(), Some(etag.as_str()), None, None).await?;
                }
                queue
                    .enqueue(
                        store.backend_id(),
                        OpKind::UpdateTask,
                        &serde_json::to_value(&resolution.local_task)?,
                        Utc::now(),
                    )
                    .await?;
            }
            conflict::QueueAction::RequeueClone { clone } => {
                queries::create_task(store.pool(), store.backend_id(), &clone).await?;
                queue
                    .enqueue(store.backend_id(), OpKind::CreateTask, &serde_json::to_value(&clone)?, Utc::now())
                    .await?;
            }
        }

        let status = match strategy {
            ConflictStrategy::ServerWins => crate::db::sync_meta::ConflictStatus::ResolvedServer,
            ConflictStrategy::LocalWins => crate::db::sync_meta::ConflictStatus::ResolvedLocal,
            ConflictStrategy::Merge => crate::db::sync_meta::ConflictStatus::ResolvedMerge,
            ConflictStrategy::KeepBoth => crate::db::sync_meta::ConflictStatus::ResolvedKeepBoth,
        };
        sync_meta::resolve_conflict(store, conflict_id, status, strategy_name(strategy)).await
    }
}

fn strategy_name(s: ConflictStrategy) -> &'static str {
    match s {
        ConflictStrategy::ServerWins => "server_wins",
        ConflictStrategy::LocalWins => "local_wins",
        ConflictStrategy::Merge => "merge",
        ConflictStrategy::KeepBoth => "keep_both",
    }
}

async fn remote_changed_since_last_seen(
    store: &Store,
    entity_id: &str,
    etag: Option<&str>,
    last_modified: Option<chrono::DateTime<Utc>>,
) -> Result<bool> {
    let Some(state) = sync_meta::get_sync_state(store, entity_id).await? else {
        return Ok(true);
    };
    if etag.is_some() || state.etag.is_some() {
        return Ok(etag != state.etag.as_deref());
    }
    Ok(last_modified != state.last_modified)
}

async fn has_pending_mutation_for(pool: &sqlx::SqlitePool, backend_id: &str, entity_uid: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM operation_queue WHERE backend_id = ? AND status = 'pending' AND payload LIKE ?",
    )
    .bind(backend_id)
    .bind(format!("%{entity_uid}%"))
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

fn remote_task_as_task(remote: &crate::backend::RemoteTask, list_id: ListId, backend_id: &str) -> Task {
    let now = Utc::now();
    Task {
        id: remote.uid.parse().unwrap_or_default(),
        list_id,
        backend_id: backend_id.to_string(),
        summary: remote.summary.clone(),
        description: remote.description.clone(),
        status: remote.status.parse().unwrap_or(Status::Todo),
        priority: remote.priority,
        due: remote.due,
        start: remote.start,
        completed: remote.completed,
        created: now,
        modified: remote.modified,
        parent: remote.parent_uid.as_ref().and_then(|p| p.parse().ok()),
        tags: remote.tags.clone(),
        recurrence: None,
        recur_from_due: false,
    }
}

fn local_task_as_remote(task: &Task) -> crate::backend::RemoteTask {
    crate::backend::RemoteTask {
        uid: task.id.to_string(),
        list_uid: task.list_id.to_string(),
        summary: task.summary.clone(),
        description: task.description.clone(),
        status: task.status.as_str().to_string(),
        priority: task.priority,
        due: task.due,
        start: task.start,
        completed: task.completed,
        modified: task.modified,
        parent_uid: task.parent.map(|p| p.to_string()),
        tags: task.tags.clone(),
        deleted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::LocalBackend;
    use crate::engine::TaskEngine;

    fn test_config() -> SyncManagerConfig {
        SyncManagerConfig {
            offline_mode: OfflineMode::Auto,
            connectivity_timeout: Duration::from_secs(5),
            conflict_resolution: ConflictStrategy::ServerWins,
            merge_fallback: MergeFallback::ServerWins,
            missing_list_policy: MissingListPolicy::SkipWarn,
            background_pull_cooldown: Duration::from_secs(30),
        }
    }

    async fn setup() -> (Store, OperationQueue, TaskEngine, Store, LocalBackend, tempfile::TempDir) {
        let (store, dir) = Store::open_temp("local-cache").await;
        let queue = OperationQueue::new(store.clone());
        let engine = TaskEngine::new(store.clone(), queue.clone());
        let remote_store = store.with_backend("local-cache-remote");
        let remote = LocalBackend::new(remote_store.clone());
        (store, queue, engine, remote_store, remote, dir)
    }

    #[tokio::test]
    async fn cooldown_gates_opportunistic_pulls() {
        let manager = SyncManager::new(test_config());
        assert!(manager.should_pull_now("nextcloud"));
        manager.note_attempt("nextcloud");
        assert!(!manager.should_pull_now("nextcloud"));
        assert!(manager.should_pull_now("other-backend"));
    }

    #[tokio::test]
    async fn pulls_a_brand_new_remote_task() {
        let (store, queue, _engine, remote_store, remote, _dir) = setup().await;
        let manager = SyncManager::new(test_config());

        let list = remote
            .create_list(&crate::backend::RemoteList {
                uid: uuid::Uuid::new_v4().to_string(),
                name: "Work".to_string(),
                color: None,
                description: None,
                deleted: false,
            })
            .await
            .unwrap();
        remote
            .create_task(&crate::backend::RemoteTask {
                uid: uuid::Uuid::new_v4().to_string(),
                list_uid: list.value.uid.clone(),
                summary: "Remote task".to_string(),
                description: None,
                status: "TODO".to_string(),
                priority: 0,
                due: None,
                start: None,
                completed: None,
                modified: Utc::now(),
                parent_uid: None,
                tags: vec![],
                deleted: false,
            })
            .await
            .unwrap();

        let summary = manager.run_cycle(&store, &queue, &remote, 1).await.unwrap();
        assert_eq!(summary.pulled_new, 1);

        let list_id: ListId = list.value.uid.parse().unwrap();
        let tasks = queries::get_tasks(&store, list_id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].summary, "Remote task");

        let _ = remote_store;
    }

    #[tokio::test]
    async fn second_cycle_with_no_changes_is_a_no_op() {
        let (store, queue, _engine, _remote_store, remote, _dir) = setup().await;
        let manager = SyncManager::new(test_config());

        let list = remote
            .create_list(&crate::backend::RemoteList { uid: String::new(), name: "Work".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        remote
            .create_task(&crate::backend::RemoteTask {
                uid: String::new(),
                list_uid: list.value.uid.clone(),
                summary: "Stable".to_string(),
                description: None,
                status: "TODO".to_string(),
                priority: 0,
                due: None,
                start: None,
                completed: None,
                modified: Utc::now(),
                parent_uid: None,
                tags: vec![],
                deleted: false,
            })
            .await
            .unwrap();

        manager.run_cycle(&store, &queue, &remote, 1).await.unwrap();
        let second = manager.run_cycle(&store, &queue, &remote, 1).await.unwrap();
        assert_eq!(second.pulled_new, 0);
        assert_eq!(second.pulled_updated, 0);
        assert_eq!(second.pushed, 0);
        assert_eq!(second.conflicts_detected, 0);
    }

    #[tokio::test]
    async fn divergent_edit_produces_a_pending_conflict() {
        let (store, queue, engine, _remote_store, remote, _dir) = setup().await;
        let manager = SyncManager::new(test_config());

        let list = remote
            .create_list(&crate::backend::RemoteList { uid: String::new(), name: "Work".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        let remote_task = remote
            .create_task(&crate::backend::RemoteTask {
                uid: String::new(),
                list_uid: list.value.uid.clone(),
                summary: "Original".to_string(),
                description: None,
                status: "TODO".to_string(),
                priority: 0,
                due: None,
                start: None,
                completed: None,
                modified: Utc::now(),
                parent_uid: None,
                tags: vec![],
                deleted: false,
            })
            .await
            .unwrap();

        manager.run_cycle(&store, &queue, &remote, 1).await.unwrap();

        let list_id: ListId = list.value.uid.parse().unwrap();
        let task_id: TaskId = remote_task.value.uid.parse().unwrap();
        let mut local = queries::get_task(&store, list_id, task_id).await.unwrap().unwrap();
        local.summary = "Local edit".to_string();
        local.touch(Utc::now() + chrono::Duration::seconds(1));
        engine.update_task(&local).await.unwrap();

        remote
            .update_task(
                &crate::backend::RemoteTask {
                    uid: remote_task.value.uid.clone(),
                    list_uid: list.value.uid.clone(),
                    summary: "Remote edit".to_string(),
                    description: None,
                    status: "TODO".to_string(),
                    priority: 0,
                    due: None,
                    start: None,
                    completed: None,
                    modified: Utc::now() + chrono::Duration::seconds(1),
                    parent_uid: None,
                    tags: vec![],
                    deleted: false,
                },
                None,
            )
            .await
            .unwrap();

        let summary = manager.run_cycle(&store, &queue, &remote, 1).await.unwrap();
        assert_eq!(summary.conflicts_detected, 1);

        let conflicts = sync_meta::list_conflicts(&store, true).await.unwrap();
        assert_eq!(conflicts.len(), 1);
    }

    #[tokio::test]
    async fn resolve_one_is_idempotent() {
        let (store, queue, _engine, _remote_store, _remote, _dir) = setup().await;
        let manager = SyncManager::new(test_config());

        let local_task = crate::model::Task {
            id: TaskId::new(),
            list_id: ListId::new(),
            backend_id: store.backend_id().to_string(),
            summary: "Local".to_string(),
            description: None,
            status: Status::Todo,
            priority: 5,
            due: None,
            start: None,
            completed: None,
            created: Utc::now(),
            modified: Utc::now(),
            parent: None,
            tags: vec![],
            recurrence: None,
            recur_from_due: false,
        };
        let mut remote_task = local_task.clone();
        remote_task.summary = "Server".to_string();
        remote_task.priority = 1;

        queries::create_list(
            store.pool(),
            store.backend_id(),
            &List {
                id: local_task.list_id,
                backend_id: store.backend_id().to_string(),
                name: "List".to_string(),
                color: "#FFFFFF".to_string(),
                description: None,
                modified: Utc::now(),
                deleted_at: None,
            },
        )
        .await
        .unwrap();
        queries::create_task(store.pool(), store.backend_id(), &local_task).await.unwrap();

        let record = sync_meta::create_conflict(
            &store,
            local_task.id.0,
            &serde_json::to_value(&local_task).unwrap(),
            &serde_json::to_value(&remote_task).unwrap(),
            local_task.modified,
            remote_task.modified,
            Utc::now(),
        )
        .await
        .unwrap();

        manager.resolve_one(&store, &queue, record.id, ConflictStrategy::ServerWins).await.unwrap();
        let after_first = queries::get_task_by_id(&store, local_task.id).await.unwrap().unwrap();
        assert_eq!(after_first.summary, "Server");

        // Resolving again (even with a different strategy) is a no-op.
        manager.resolve_one(&store, &queue, record.id, ConflictStrategy::KeepBoth).await.unwrap();
        let after_second = queries::get_task_by_id(&store, local_task.id).await.unwrap().unwrap();
        assert_eq!(after_second.summary, "Server");
    }

    /// Wraps a [`LocalBackend`] but fails every `update_task` with
    /// `Error::Conflict`, the way a real adapter does on an `If-Match`
    /// precondition failure (`backend/caldav.rs`, `backend/google_tasks.rs`,
    /// `backend/msft_todo.rs`), so push-side conflict handling can be
    /// exercised without a network.
    struct PreconditionFailingBackend {
        inner: LocalBackend,
    }

    #[async_trait::async_trait]
    impl TaskBackend for PreconditionFailingBackend {
        fn backend_id(&self) -> &str {
            self.inner.backend_id()
        }
        fn capabilities(&self) -> crate::backend::Capabilities {
            self.inner.capabilities()
        }
        async fn probe(&self) -> Result<()> {
            self.inner.probe().await
        }
        async fn get_lists(&self) -> Result<Vec<crate::backend::EtagOr<crate::backend::RemoteList>>> {
            self.inner.get_lists().await
        }
        async fn get_list(&self, uid: &str) -> Result<Option<crate::backend::EtagOr<crate::backend::RemoteList>>> {
            self.inner.get_list(uid).await
        }
        async fn create_list(&self, list: &crate::backend::RemoteList) -> Result<crate::backend::EtagOr<crate::backend::RemoteList>> {
            self.inner.create_list(list).await
        }
        async fn update_list(
            &self,
            list: &crate::backend::RemoteList,
            precondition_etag: Option<&str>,
        ) -> Result<crate::backend::EtagOr<crate::backend::RemoteList>> {
            self.inner.update_list(list, precondition_etag).await
        }
        async fn delete_list(&self, uid: &str) -> Result<()> {
            self.inner.delete_list(uid).await
        }
        async fn restore_list(&self, uid: &str) -> Result<()> {
            self.inner.restore_list(uid).await
        }
        async fn purge_list(&self, uid: &str) -> Result<()> {
            self.inner.purge_list(uid).await
        }
        async fn get_deleted_lists(&self) -> Result<Vec<crate::backend::EtagOr<crate::backend::RemoteList>>> {
            self.inner.get_deleted_lists().await
        }
        async fn get_tasks(&self, list_uid: &str) -> Result<Vec<crate::backend::EtagOr<crate::backend::RemoteTask>>> {
            self.inner.get_tasks(list_uid).await
        }
        async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<crate::backend::EtagOr<crate::backend::RemoteTask>>> {
            self.inner.get_task(list_uid, uid).await
        }
        async fn create_task(&self, task: &crate::backend::RemoteTask) -> Result<crate::backend::EtagOr<crate::backend::RemoteTask>> {
            self.inner.create_task(task).await
        }
        async fn update_task(
            &self,
            _task: &crate::backend::RemoteTask,
            _precondition_etag: Option<&str>,
        ) -> Result<crate::backend::EtagOr<crate::backend::RemoteTask>> {
            Err(Error::Conflict("simulated etag mismatch".to_string()))
        }
        async fn delete_task(&self, list_uid: &str, uid: &str) -> Result<()> {
            self.inner.delete_task(list_uid, uid).await
        }
    }

    #[tokio::test]
    async fn push_precondition_failure_records_a_conflict_and_does_not_drop_the_mutation() {
        let (store, queue, engine, remote_store, remote, _dir) = setup().await;
        let manager = SyncManager::new(test_config());

        let list = remote
            .create_list(&crate::backend::RemoteList { uid: String::new(), name: "Work".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        let remote_task = remote
            .create_task(&crate::backend::RemoteTask {
                uid: String::new(),
                list_uid: list.value.uid.clone(),
                summary: "Original".to_string(),
                description: None,
                status: "TODO".to_string(),
                priority: 0,
                due: None,
                start: None,
                completed: None,
                modified: Utc::now(),
                parent_uid: None,
                tags: vec![],
                deleted: false,
            })
            .await
            .unwrap();

        // First cycle pulls the task locally and records a baseline.
        manager.run_cycle(&store, &queue, &remote, 1).await.unwrap();

        let list_id: ListId = list.value.uid.parse().unwrap();
        let task_id: TaskId = remote_task.value.uid.parse().unwrap();
        let mut local = queries::get_task(&store, list_id, task_id).await.unwrap().unwrap();
        local.summary = "Local edit".to_string();
        local.touch(Utc::now() + chrono::Duration::seconds(1));
        engine.update_task(&local).await.unwrap();
        assert_eq!(queue.list_for_backend(store.backend_id()).await.unwrap().len(), 1);

        let conflicting = PreconditionFailingBackend { inner: LocalBackend::new(remote_store) };
        let summary = manager.run_cycle(&store, &queue, &conflicting, 1).await.unwrap();
        assert_eq!(summary.conflicts_detected, 1);

        // The queue entry is gone (completed), but the mutation survives as
        // a pending conflict rather than being silently discarded.
        assert!(queue.list_for_backend(store.backend_id()).await.unwrap().is_empty());
        let conflicts = sync_meta::list_conflicts(&store, true).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].task_id, task_id.0);
        let recorded_local: Task = serde_json::from_value(conflicts[0].local_version.clone()).unwrap();
        assert_eq!(recorded_local.summary, "Local edit");
    }
}
