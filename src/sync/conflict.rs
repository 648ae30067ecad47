// sync/conflict.rs - Conflict Resolver (C5).
//
// A conflict is any pair (local, remote) on the same stable UID where both
// sides changed since last common ancestor (last successful sync). This
// module is pure: given a captured conflict plus the chosen strategy, it
// describes the local-store write and queue side effect to apply; it never
// touches the database itself (`sync::SyncManager` does that, so the two
// can be tested independently - mirroring how `model::date`/`model::glob`
// are pure helpers the engine drives).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::config::MergeFallback;
use crate::model::Task;
use crate::Result;

pub use crate::config::ConflictStrategy;

/// What the sync manager should do with the queued local mutation (if any)
/// that was in flight for this entity when the conflict was detected.
#[derive(Debug, Clone)]
pub enum QueueAction {
    /// server-wins: the queued local mutation is discarded - the remote's
    /// version is now authoritative and nothing should be pushed.
    Discard,
    /// local-wins / merge: enqueue a fresh update pushing `task` to the
    /// remote, carrying `precondition_etag` as the `If-Match` token.
    RequeueUpdate { precondition_etag: Option<String> },
    /// keep-both: `task` (mirroring the remote) is written locally as-is,
    /// and `clone` is additionally created locally and queued as a new
    /// create-op cloning the pre-conflict local values.
    RequeueClone { clone: Task },
}

/// The resolved outcome: `local_task` is what the local store should now
/// hold for the conflicting UID, and `queue_action` says what (if anything)
/// to do with the queue.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub local_task: Task,
    pub queue_action: QueueAction,
}

/// Apply `strategy` to a detected conflict.
///
/// - `local`: the local task as it stood when the conflict was detected.
/// - `remote`: the remote task's current state.
/// - `remote_etag`: the remote's current version token, if any, carried
///   forward as the precondition on any requeued push.
/// - `merge_fallback`: spec §9/§4.5 Open Question - which side a merge's
///   truly-conflicting scalar fields fall back to (default server-wins).
pub fn resolve(
    strategy: ConflictStrategy,
    local: &Task,
    remote: &Task,
    remote_etag: Option<String>,
    merge_fallback: MergeFallback,
    now: DateTime<Utc>,
) -> Result<Resolution> {
    match strategy {
        ConflictStrategy::ServerWins => Ok(Resolution {
            local_task: remote.clone(),
            queue_action: QueueAction::Discard,
        }),
        ConflictStrategy::LocalWins => Ok(Resolution {
            local_task: local.clone(),
            queue_action: QueueAction::RequeueUpdate {
                precondition_etag: remote_etag,
            },
        }),
        ConflictStrategy::Merge => {
            let merged = merge_fields(local, remote, merge_fallback, now);
            Ok(Resolution {
                local_task: merged,
                queue_action: QueueAction::RequeueUpdate {
                    precondition_etag: remote_etag,
                },
            })
        }
        ConflictStrategy::KeepBoth => {
            let mut clone = local.clone();
            clone.id = crate::model::TaskId::new();
            clone.summary = format!("{} (local)", local.summary);
            clone.created = now;
            clone.modified = now;
            Ok(Resolution {
                local_task: remote.clone(),
                queue_action: QueueAction::RequeueClone { clone },
            })
        }
    }
}

/// Field-wise merge (spec §4.5 "merge"): tags are unioned (case-sensitive
/// dedup); scalar fields that differ between local and remote but only one
/// side changed resolve to that side; truly conflicting scalars fall back
/// to `merge_fallback`.
///
/// "Only one side changed" can't be determined without a captured common
/// ancestor, which this crate doesn't retain per-field; in practice the
/// two versions captured at conflict-detection time *are* the divergence,
/// so any scalar that differs between `local` and `remote` is treated as a
/// true conflict and resolved via `merge_fallback`, while fields that
/// already agree pass straight through unconditioned.
fn merge_fields(local: &Task, remote: &Task, fallback: MergeFallback, now: DateTime<Utc>) -> Task {
    let mut merged = local.clone();

    let tags: BTreeSet<String> = local.tags.iter().chain(remote.tags.iter()).cloned().collect();
    merged.tags = tags.into_iter().collect();

    let take_remote = matches!(fallback, MergeFallback::ServerWins);

    if local.summary != remote.summary {
        merged.summary = if take_remote { remote.summary.clone() } else { local.summary.clone() };
    }
    if local.description != remote.description {
        merged.description = if take_remote { remote.description.clone() } else { local.description.clone() };
    }
    if local.status != remote.status {
        merged.set_status(if take_remote { remote.status } else { local.status }, now);
    }
    if local.priority != remote.priority {
        merged.priority = if take_remote { remote.priority } else { local.priority };
    }
    if local.due != remote.due {
        merged.due = if take_remote { remote.due } else { local.due };
    }
    if local.start != remote.start {
        merged.start = if take_remote { remote.start } else { local.start };
    }

    merged.touch(now);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListId, Status, TaskId};

    fn sample(summary: &str, priority: u8, tags: Vec<&str>) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            list_id: ListId::new(),
            backend_id: "sqlite".to_string(),
            summary: summary.to_string(),
            description: None,
            status: Status::Todo,
            priority,
            due: None,
            start: None,
            completed: None,
            created: now,
            modified: now,
            parent: None,
            tags: tags.into_iter().map(String::from).collect(),
            recurrence: None,
            recur_from_due: false,
        }
    }

    #[test]
    fn server_wins_discards_queued_mutation() {
        let local = sample("Local", 5, vec![]);
        let remote = sample("Server", 1, vec![]);
        let res = resolve(
            ConflictStrategy::ServerWins,
            &local,
            &remote,
            None,
            MergeFallback::ServerWins,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(res.local_task.summary, "Server");
        assert_eq!(res.local_task.priority, 1);
        assert!(matches!(res.queue_action, QueueAction::Discard));
    }

    #[test]
    fn local_wins_keeps_local_and_requeues_with_etag() {
        let local = sample("Local", 5, vec![]);
        let remote = sample("Server", 1, vec![]);
        let res = resolve(
            ConflictStrategy::LocalWins,
            &local,
            &remote,
            Some("etag-2".to_string()),
            MergeFallback::ServerWins,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(res.local_task.summary, "Local");
        match res.queue_action {
            QueueAction::RequeueUpdate { precondition_etag } => {
                assert_eq!(precondition_etag.as_deref(), Some("etag-2"));
            }
            _ => panic!("expected RequeueUpdate"),
        }
    }

    #[test]
    fn keep_both_clones_local_with_suffix_and_mirrors_remote() {
        let local = sample("Local", 5, vec![]);
        let remote = sample("Server", 1, vec![]);
        let res = resolve(
            ConflictStrategy::KeepBoth,
            &local,
            &remote,
            None,
            MergeFallback::ServerWins,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(res.local_task.summary, "Server");
        match res.queue_action {
            QueueAction::RequeueClone { clone } => {
                assert_eq!(clone.summary, "Local (local)");
                assert_eq!(clone.priority, 5);
                assert_ne!(clone.id, local.id);
            }
            _ => panic!("expected RequeueClone"),
        }
    }

    #[test]
    fn merge_unions_tags_case_sensitively() {
        let local = sample("Same", 5, vec!["a", "b"]);
        let remote = sample("Same", 5, vec!["B", "c"]);
        let res = resolve(
            ConflictStrategy::Merge,
            &local,
            &remote,
            None,
            MergeFallback::ServerWins,
            Utc::now(),
        )
        .unwrap();
        let mut tags = res.local_task.tags.clone();
        tags.sort();
        assert_eq!(tags, vec!["B".to_string(), "a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn merge_scalar_conflict_falls_back_per_config() {
        let local = sample("Local", 5, vec![]);
        let remote = sample("Server", 1, vec![]);

        let server_wins = resolve(
            ConflictStrategy::Merge,
            &local,
            &remote,
            None,
            MergeFallback::ServerWins,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(server_wins.local_task.summary, "Server");

        let local_wins = resolve(
            ConflictStrategy::Merge,
            &local,
            &remote,
            None,
            MergeFallback::LocalWins,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(local_wins.local_task.summary, "Local");
    }

    #[test]
    fn resolving_twice_is_idempotent_at_the_state_machine_level() {
        // Resolution itself is a pure function of (strategy, local, remote);
        // calling it twice with the same inputs yields the same output, and
        // `db::sync_meta::resolve_conflict`'s `WHERE status = 'pending'`
        // guard is what makes re-resolving a stored conflict a no-op.
        let local = sample("Local", 5, vec![]);
        let remote = sample("Server", 1, vec![]);
        let first = resolve(ConflictStrategy::ServerWins, &local, &remote, None, MergeFallback::ServerWins, Utc::now()).unwrap();
        let second = resolve(ConflictStrategy::ServerWins, &local, &remote, None, MergeFallback::ServerWins, Utc::now()).unwrap();
        assert_eq!(first.local_task.summary, second.local_task.summary);
    }
}
