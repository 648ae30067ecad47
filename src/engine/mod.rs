// engine/mod.rs - Task Engine (C7): the only component the CLI command
// handlers call into for anything that touches persisted state. Owns
// naming/matching, path-based creation, bulk glob resolution, the
// circular-parent check, and cascade delete, all sitting directly on
// `db::Store` + `queue::OperationQueue` so CLI and sync share identical
// validation (spec §4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{queries, Store};
use crate::model::{glob, path::TaskPath, List, ListId, Status, Task, TaskId};
use crate::queue::{OpKind, OperationQueue};
use crate::{Error, Result};

/// A resolved match target: either resolution succeeded uniquely, or the
/// caller needs to decide what "no match"/"multiple matches" means for
/// its surface (CLI turns both into an `Error`; sync never matches by name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Match against summaries within the list (exact ci-equality, then
    /// unique ci-substring).
    ByName,
    /// Bypass matching; look up by backend UID.
    ByUid,
    /// Bypass matching; look up by local SQLite row id. Caller must have
    /// already verified `sync.enabled`.
    ByLocalId,
}

/// Outcome of a bulk glob mutation (spec §4.7 "reports the number of
/// affected tasks"; "glob matching nothing under an existing parent is
/// INFO_ONLY with count 0; a glob whose parent itself does not exist is
/// an ERROR").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResult {
    pub affected: Vec<TaskId>,
}

pub struct TaskEngine {
    store: Store,
    queue: OperationQueue,
}

impl TaskEngine {
    pub fn new(store: Store, queue: OperationQueue) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---------------------------------------------------------- lists --

    pub async fn get_list_by_name(&self, name: &str) -> Result<List> {
        queries::get_list_by_name(&self.store, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("list {name}")))
    }

    pub async fn create_list(&self, name: &str, color: &str, description: Option<String>) -> Result<List> {
        if queries::get_list_by_name(&self.store, name).await?.is_some() {
            return Err(Error::Validation(format!("list {name} already exists")));
        }
        let now = Utc::now();
        let list = List {
            id: ListId::new(),
            backend_id: self.store.backend_id().to_string(),
            name: name.to_string(),
            color: crate::model::color::normalize(color)?,
            description,
            modified: now,
            deleted_at: None,
        };
        let mut tx = self.store.pool().begin().await?;
        queries::create_list(&mut *tx, self.store.backend_id(), &list).await?;
        self.queue
            .enqueue_in_tx(
                &mut tx,
                self.store.backend_id(),
                OpKind::CreateList,
                &serde_json::to_value(&list)?,
                now,
            )
            .await?;
        tx.commit().await?;
        Ok(list)
    }

    pub async fn get_lists(&self) -> Result<Vec<List>> {
        queries::get_lists(&self.store).await
    }

    pub async fn get_deleted_lists(&self) -> Result<Vec<List>> {
        queries::get_deleted_lists(&self.store).await
    }

    pub async fn delete_list(&self, id: ListId) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;
        queries::delete_list(&mut *tx, self.store.backend_id(), id, now).await?;
        self.queue
            .enqueue_in_tx(
                &mut tx,
                self.store.backend_id(),
                OpKind::DeleteList,
                &serde_json::json!({ "id": id.to_string() }),
                now,
            )
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Restore a trashed list. There's no dedicated `OpKind` for list
    /// restoration; the queue fan-out reuses `UpdateList` since a restore
    /// is, from the remote's point of view, "this list's deleted flag
    /// changed" rather than a distinct operation.
    pub async fn restore_list(&self, id: ListId) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.store.pool().begin().await?;
        queries::restore_list(&mut *tx, self.store.backend_id(), id, now).await?;
        self.queue
            .enqueue_in_tx(
                &mut tx,
                self.store.backend_id(),
                OpKind::UpdateList,
                &serde_json::json!({ "id": id.to_string() }),
                now,
            )
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---------------------------------------------------------- tasks --

    pub async fn list_tasks(&self, list_id: ListId) -> Result<Vec<Task>> {
        queries::get_tasks(&self.store, list_id).await
    }

    // ---------------------------------------------------------- match --

    /// Resolve a task reference within `list_id` per spec §4.7: exact
    /// case-insensitive equality beats unique case-insensitive substring;
    /// anything else is `NotFound`/`Ambiguous`.
    pub async fn resolve_task(
        &self,
        list_id: ListId,
        reference: &str,
        mode: MatchMode,
    ) -> Result<Task> {
        match mode {
            MatchMode::ByUid => {
                let task_id: TaskId = reference
                    .parse()
                    .map_err(|_| Error::Validation(format!("invalid uid: {reference}")))?;
                queries::get_task(&self.store, list_id, task_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("task with uid {reference}")))
            }
            MatchMode::ByLocalId => {
                let local_id: i64 = reference
                    .parse()
                    .map_err(|_| Error::Validation(format!("invalid local id: {reference}")))?;
                queries::get_task_by_local_id(&self.store, local_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("task with local id {reference}")))
            }
            MatchMode::ByName => {
                let tasks = queries::get_tasks(&self.store, list_id).await?;
                match_by_name(&tasks, reference)
            }
        }
    }

    // --------------------------------------------------- path creation --

    /// Create a task from `input`. If `literal` is set or `input` has no
    /// `/`, the entire string becomes the summary with no hierarchy.
    /// Otherwise `input` is parsed as a path; missing intermediates are
    /// auto-created (found by case-insensitive name within the same
    /// parent first, so repeated path creation never duplicates a node),
    /// and the leaf becomes a new task under the final intermediate.
    pub async fn create_by_path(&self, list_id: ListId, input: &str, literal: bool) -> Result<Task> {
        if literal {
            return self.create_leaf(list_id, input, None).await;
        }
        let Some(parsed) = TaskPath::parse(input) else {
            return self.create_leaf(list_id, input, None).await;
        };

        let mut parent: Option<TaskId> = None;
        for segment in parsed.parents() {
            parent = Some(self.find_or_create_child(list_id, parent, segment).await?);
        }
        self.create_leaf(list_id, parsed.leaf(), parent).await
    }

    async fn find_or_create_child(
        &self,
        list_id: ListId,
        parent: Option<TaskId>,
        name: &str,
    ) -> Result<TaskId> {
        let tasks = queries::get_tasks(&self.store, list_id).await?;
        if let Some(existing) = tasks
            .iter()
            .find(|t| t.parent == parent && t.summary.eq_ignore_ascii_case(name))
        {
            return Ok(existing.id);
        }
        Ok(self.create_leaf(list_id, name, parent).await?.id)
    }

    async fn create_leaf(&self, list_id: ListId, summary: &str, parent: Option<TaskId>) -> Result<Task> {
        if summary.trim().is_empty() {
            return Err(Error::Validation("summary must not be empty".to_string()));
        }
        if let Some(parent_id) = parent {
            self.check_parent_in_list(list_id, parent_id).await?;
        }
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            list_id,
            backend_id: self.store.backend_id().to_string(),
            summary: summary.to_string(),
            description: None,
            status: Status::Todo,
            priority: 0,
            due: None,
            start: None,
            completed: None,
            created: now,
            modified: now,
            parent,
            tags: Vec::new(),
            recurrence: None,
            recur_from_due: false,
        };
        let mut tx = self.store.pool().begin().await?;
        queries::create_task(&mut *tx, self.store.backend_id(), &task).await?;
        self.queue
            .enqueue_in_tx(
                &mut tx,
                self.store.backend_id(),
                OpKind::CreateTask,
                &serde_json::to_value(&task)?,
                now,
            )
            .await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn check_parent_in_list(&self, list_id: ListId, parent_id: TaskId) -> Result<()> {
        let parent = queries::get_task(&self.store, list_id, parent_id).await?;
        if parent.is_none() {
            return Err(Error::Validation("parent must live in the same list".to_string()));
        }
        Ok(())
    }

    // ---------------------------------------------------- mutate/reparent --

    /// Reparent `task_id` to `new_parent`, rejecting a cycle (spec §4.7
    /// "setting a task's parent to one of its own descendants is rejected").
    /// Orphans (a parent UID pointing to nothing) are tolerated elsewhere,
    /// but this call always validates the *new* parent exists.
    pub async fn set_parent(&self, list_id: ListId, task_id: TaskId, new_parent: Option<TaskId>) -> Result<Task> {
        if let Some(candidate) = new_parent {
            if candidate == task_id {
                return Err(Error::Validation("a task cannot be its own parent".to_string()));
            }
            self.check_parent_in_list(list_id, candidate).await?;
            if self.is_descendant(list_id, task_id, candidate).await? {
                return Err(Error::Validation(
                    "circular parent reference: new parent is a descendant of this task".to_string(),
                ));
            }
        }
        let mut task = queries::get_task(&self.store, list_id, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        task.parent = new_parent;
        task.touch(Utc::now());
        self.persist_update(&task).await?;
        Ok(task)
    }

    /// `true` if `candidate` is a descendant of `ancestor` (used to reject
    /// cycles before they're written, per the acyclic-parent-graph invariant).
    async fn is_descendant(&self, list_id: ListId, ancestor: TaskId, candidate: TaskId) -> Result<bool> {
        let tasks = queries::get_tasks(&self.store, list_id).await?;
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = tasks.iter().find(|t| t.id == id).and_then(|t| t.parent);
        }
        Ok(false)
    }

    pub async fn update_task(&self, task: &Task) -> Result<()> {
        self.persist_update(task).await
    }

    async fn persist_update(&self, task: &Task) -> Result<()> {
        let mut tx = self.store.pool().begin().await?;
        queries::update_task(&mut *tx, self.store.backend_id(), task).await?;
        self.queue
            .enqueue_in_tx(
                &mut tx,
                self.store.backend_id(),
                OpKind::UpdateTask,
                &serde_json::to_value(task)?,
                Utc::now(),
            )
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete `task_id` and all descendants atomically; the queue fan-out
    /// is ordered deepest-first so pushing never references an
    /// already-deleted parent (spec §4.7 "cascade delete").
    pub async fn delete_task_cascade(&self, list_id: ListId, task_id: TaskId) -> Result<Vec<TaskId>> {
        let descendants = queries::get_descendants_deepest_first(&self.store, list_id, task_id).await?;
        let mut deleted = Vec::new();
        let mut tx = self.store.pool().begin().await?;
        for descendant in &descendants {
            self.queue
                .enqueue_in_tx(
                    &mut tx,
                    self.store.backend_id(),
                    OpKind::DeleteTask,
                    &serde_json::json!({ "id": descendant.id.to_string(), "list_id": list_id.to_string() }),
                    Utc::now(),
                )
                .await?;
            deleted.push(descendant.id);
        }
        self.queue
            .enqueue_in_tx(
                &mut tx,
                self.store.backend_id(),
                OpKind::DeleteTask,
                &serde_json::json!({ "id": task_id.to_string(), "list_id": list_id.to_string() }),
                Utc::now(),
            )
            .await?;
        deleted.push(task_id);
        // The FK cascade on `tasks.parent` removes descendants in the same
        // statement, but the queue fan-out above still needs one entry per
        // node so each deletion reaches the remote independently.
        queries::delete_task(&mut *tx, self.store.backend_id(), task_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    // ------------------------------------------------------- bulk glob --

    /// Resolve a bulk glob expression (`Parent/*` or `Parent/**`) against
    /// `list_id`. Returns the matched tasks; an empty match under an
    /// existing parent is `Ok(vec![])` (caller renders INFO_ONLY), while a
    /// missing parent is an `Error::NotFound` (caller renders ERROR).
    pub async fn resolve_glob(&self, list_id: ListId, input: &str) -> Result<BulkResult> {
        let (parent_path, scope) =
            glob::parse(input).ok_or_else(|| Error::Validation(format!("not a glob expression: {input}")))?;

        let parent_task = self.resolve_path_target(list_id, parent_path).await?;
        let tasks = queries::get_tasks(&self.store, list_id).await?;

        let affected = match scope {
            glob::GlobScope::Children => tasks
                .iter()
                .filter(|t| t.parent == Some(parent_task))
                .map(|t| t.id)
                .collect(),
            glob::GlobScope::Descendants => {
                queries::get_descendants_deepest_first(&self.store, list_id, parent_task)
                    .await?
                    .into_iter()
                    .map(|t| t.id)
                    .collect()
            }
        };
        Ok(BulkResult { affected })
    }

    /// Resolve a `/`-separated path down to the task it names, requiring
    /// every intermediate to already exist (used to anchor a bulk glob's
    /// parent; unlike [`Self::create_by_path`] this never creates anything).
    async fn resolve_path_target(&self, list_id: ListId, path: &str) -> Result<TaskId> {
        let segments: Vec<&str> = path.split('/').map(str::trim).collect();
        let tasks = queries::get_tasks(&self.store, list_id).await?;
        let mut parent: Option<TaskId> = None;
        let mut current: Option<TaskId> = None;
        for segment in &segments {
            let found = tasks
                .iter()
                .find(|t| t.parent == parent && t.summary.eq_ignore_ascii_case(segment))
                .ok_or_else(|| Error::NotFound(format!("no task named {segment} under the given parent")))?;
            current = Some(found.id);
            parent = current;
        }
        current.ok_or_else(|| Error::NotFound(format!("empty path: {path}")))
    }

    // --------------------------------------------------------- trash ---

    pub async fn purge_expired_trash(&self, retention_days: u32) -> Result<u64> {
        queries::purge_expired_trash(&self.store, retention_days, Utc::now()).await
    }
}

/// Name matching precedence (spec §4.7): exact case-insensitive equality,
/// then unique case-insensitive substring; otherwise `NotFound`/`Ambiguous`.
fn match_by_name(tasks: &[Task], reference: &str) -> Result<Task> {
    let needle = reference.to_ascii_lowercase();

    if let Some(exact) = tasks.iter().find(|t| t.summary.to_ascii_lowercase() == needle) {
        return Ok(exact.clone());
    }

    let substring_matches: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.summary.to_ascii_lowercase().contains(&needle))
        .collect();

    match substring_matches.len() {
        0 => Err(Error::NotFound(format!("no task matching {reference}"))),
        1 => Ok(substring_matches[0].clone()),
        _ => Err(Error::Ambiguous(format!(
            "{} tasks match {reference}",
            substring_matches.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    async fn engine() -> (TaskEngine, ListId, tempfile::TempDir) {
        let (store, dir) = Store::open_temp("sqlite").await;
        let queue = OperationQueue::new(store.clone());
        let engine = TaskEngine::new(store, queue);
        let list = engine.create_list("Work", "#FFFFFF", None).await.unwrap();
        (engine, list.id, dir)
    }

    #[tokio::test]
    async fn path_creation_does_not_duplicate_intermediates() {
        let (engine, list_id, _dir) = engine().await;
        engine.create_by_path(list_id, "R/B/X", false).await.unwrap();
        engine.create_by_path(list_id, "R/B/Y", false).await.unwrap();

        let tasks = queries::get_tasks(engine.store(), list_id).await.unwrap();
        assert_eq!(tasks.len(), 4);
        let r = tasks.iter().find(|t| t.summary == "R").unwrap();
        let b = tasks.iter().find(|t| t.summary == "B").unwrap();
        let x = tasks.iter().find(|t| t.summary == "X").unwrap();
        let y = tasks.iter().find(|t| t.summary == "Y").unwrap();
        assert_eq!(b.parent, Some(r.id));
        assert_eq!(x.parent, Some(b.id));
        assert_eq!(y.parent, Some(b.id));
    }

    #[tokio::test]
    async fn literal_flag_disables_path_parsing() {
        let (engine, list_id, _dir) = engine().await;
        let task = engine.create_by_path(list_id, "A/B/C", true).await.unwrap();
        assert_eq!(task.summary, "A/B/C");
        assert!(task.parent.is_none());
    }

    #[tokio::test]
    async fn name_matching_precedence() {
        let (engine, list_id, _dir) = engine().await;
        engine.create_leaf(list_id, "Buy milk", None).await.unwrap();
        engine.create_leaf(list_id, "Buy milk and eggs", None).await.unwrap();

        // Exact match wins even though it's also a substring of the other.
        let exact = engine.resolve_task(list_id, "buy milk", MatchMode::ByName).await.unwrap();
        assert_eq!(exact.summary, "Buy milk");

        let ambiguous = engine.resolve_task(list_id, "buy", MatchMode::ByName).await;
        assert!(matches!(ambiguous, Err(Error::Ambiguous(_))));

        let not_found = engine.resolve_task(list_id, "nope", MatchMode::ByName).await;
        assert!(matches!(not_found, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn rejects_circular_parent() {
        let (engine, list_id, _dir) = engine().await;
        let a = engine.create_leaf(list_id, "A", None).await.unwrap();
        let b = engine.create_leaf(list_id, "B", Some(a.id)).await.unwrap();

        let result = engine.set_parent(list_id, a.id, Some(b.id)).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn bulk_glob_children_vs_descendants() {
        let (engine, list_id, _dir) = engine().await;
        engine.create_by_path(list_id, "Parent/ChildA", false).await.unwrap();
        engine.create_by_path(list_id, "Parent/ChildB/Grandchild", false).await.unwrap();

        let children = engine.resolve_glob(list_id, "Parent/*").await.unwrap();
        assert_eq!(children.affected.len(), 2);

        let descendants = engine.resolve_glob(list_id, "Parent/**").await.unwrap();
        assert_eq!(descendants.affected.len(), 3);
    }

    #[tokio::test]
    async fn glob_on_missing_parent_is_error() {
        let (engine, list_id, _dir) = engine().await;
        let result = engine.resolve_glob(list_id, "Nope/*").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn glob_matching_nothing_is_empty_not_error() {
        let (engine, list_id, _dir) = engine().await;
        engine.create_leaf(list_id, "Parent", None).await.unwrap();
        let result = engine.resolve_glob(list_id, "Parent/*").await.unwrap();
        assert!(result.affected.is_empty());
    }

    #[tokio::test]
    async fn cascade_delete_orders_deepest_first() {
        let (engine, list_id, _dir) = engine().await;
        let root = engine.create_leaf(list_id, "Root", None).await.unwrap();
        let child = engine.create_leaf(list_id, "Child", Some(root.id)).await.unwrap();
        let grandchild = engine.create_leaf(list_id, "Grandchild", Some(child.id)).await.unwrap();

        let deleted = engine.delete_task_cascade(list_id, root.id).await.unwrap();
        assert_eq!(deleted, vec![grandchild.id, child.id, root.id]);

        let remaining = queries::get_tasks(engine.store(), list_id).await.unwrap();
        assert!(remaining.is_empty());
    }
}
