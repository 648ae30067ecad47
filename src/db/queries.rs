// db/queries.rs - CRUD for lists and tasks against the local store (C1)

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{Executor, Row, Sqlite};

use crate::db::Store;
use crate::model::{List, ListId, Status, Task, TaskId};
use crate::{Error, Result};

// ---------------------------------------------------------------- lists --

pub async fn get_lists(store: &Store) -> Result<Vec<List>> {
    let rows = sqlx::query(
        "SELECT * FROM task_lists WHERE backend_id = ? AND deleted_at IS NULL ORDER BY name",
    )
    .bind(store.backend_id())
    .fetch_all(store.pool())
    .await?;
    rows.iter().map(row_to_list).collect()
}

pub async fn get_deleted_lists(store: &Store) -> Result<Vec<List>> {
    let rows = sqlx::query(
        "SELECT * FROM task_lists WHERE backend_id = ? AND deleted_at IS NOT NULL ORDER BY deleted_at",
    )
    .bind(store.backend_id())
    .fetch_all(store.pool())
    .await?;
    rows.iter().map(row_to_list).collect()
}

pub async fn get_list(store: &Store, id: ListId) -> Result<Option<List>> {
    let row = sqlx::query("SELECT * FROM task_lists WHERE backend_id = ? AND id = ?")
        .bind(store.backend_id())
        .bind(id.to_string())
        .fetch_optional(store.pool())
        .await?;
    row.as_ref().map(row_to_list).transpose()
}

pub async fn get_list_by_name(store: &Store, name: &str) -> Result<Option<List>> {
    let row = sqlx::query(
        "SELECT * FROM task_lists WHERE backend_id = ? AND LOWER(name) = LOWER(?) AND deleted_at IS NULL",
    )
    .bind(store.backend_id())
    .bind(name)
    .fetch_optional(store.pool())
    .await?;
    row.as_ref().map(row_to_list).transpose()
}

/// Generic over `E: Executor` (a pool, or `&mut Transaction`) so callers
/// that need this insert to commit-or-rollback together with a queue
/// enqueue (spec §4.3 "Enqueue happens inside the same local transaction
/// as the mutation it describes") can pass `&mut *tx`; callers with no such
/// requirement pass `store.pool()`.
pub async fn create_list<'e, E>(executor: E, backend_id: &str, list: &List) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO task_lists (id, backend_id, name, color, description, modified, deleted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(list.id.to_string())
    .bind(backend_id)
    .bind(&list.name)
    .bind(&list.color)
    .bind(&list.description)
    .bind(list.modified)
    .bind(list.deleted_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_list(store: &Store, list: &List) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE task_lists
        SET name = ?, color = ?, description = ?, modified = ?, deleted_at = ?
        WHERE backend_id = ? AND id = ?
        "#,
    )
    .bind(&list.name)
    .bind(&list.color)
    .bind(&list.description)
    .bind(list.modified)
    .bind(list.deleted_at)
    .bind(store.backend_id())
    .bind(list.id.to_string())
    .execute(store.pool())
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("list {}", list.id)));
    }
    Ok(())
}

/// Soft delete: sets `deleted_at`. Does not cascade to tasks until [`purge_list`].
pub async fn delete_list<'e, E>(executor: E, backend_id: &str, id: ListId, now: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE task_lists SET deleted_at = ?, modified = ? WHERE backend_id = ? AND id = ? AND deleted_at IS NULL",
    )
    .bind(now)
    .bind(now)
    .bind(backend_id)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("list {id}")));
    }
    Ok(())
}

pub async fn restore_list<'e, E>(executor: E, backend_id: &str, id: ListId, now: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE task_lists SET deleted_at = NULL, modified = ? WHERE backend_id = ? AND id = ? AND deleted_at IS NOT NULL",
    )
    .bind(now)
    .bind(backend_id)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("list {id}")));
    }
    Ok(())
}

/// Hard delete: removes the row and cascades to its tasks (FK `ON DELETE CASCADE`).
pub async fn purge_list(store: &Store, id: ListId) -> Result<()> {
    let result = sqlx::query("DELETE FROM task_lists WHERE backend_id = ? AND id = ?")
        .bind(store.backend_id())
        .bind(id.to_string())
        .execute(store.pool())
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("list {id}")));
    }
    Ok(())
}

/// Purge every trashed list whose `deleted_at` is older than `retention_days`.
/// `retention_days == 0` disables auto-purge (spec §3).
pub async fn purge_expired_trash(store: &Store, retention_days: u32, now: DateTime<Utc>) -> Result<u64> {
    if retention_days == 0 {
        return Ok(0);
    }
    let threshold = now - chrono::Duration::days(retention_days as i64);
    let result = sqlx::query(
        "DELETE FROM task_lists WHERE backend_id = ? AND deleted_at IS NOT NULL AND deleted_at < ?",
    )
    .bind(store.backend_id())
    .bind(threshold)
    .execute(store.pool())
    .await?;
    Ok(result.rows_affected())
}

fn row_to_list(row: &sqlx::sqlite::SqliteRow) -> Result<List> {
    let id: String = row.try_get("id")?;
    Ok(List {
        id: ListId::from_str(&id).map_err(|e| Error::Internal(format!("bad list id: {e}")))?,
        backend_id: row.try_get("backend_id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        description: row.try_get("description")?,
        modified: row.try_get("modified")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

// ---------------------------------------------------------------- tasks --

pub async fn get_tasks(store: &Store, list_id: ListId) -> Result<Vec<Task>> {
    let rows = sqlx::query("SELECT * FROM tasks WHERE backend_id = ? AND list_id = ? ORDER BY created")
        .bind(store.backend_id())
        .bind(list_id.to_string())
        .fetch_all(store.pool())
        .await?;
    rows.iter().map(row_to_task).collect()
}

pub async fn get_task(store: &Store, list_id: ListId, task_id: TaskId) -> Result<Option<Task>> {
    let row = sqlx::query("SELECT * FROM tasks WHERE backend_id = ? AND list_id = ? AND id = ?")
        .bind(store.backend_id())
        .bind(list_id.to_string())
        .bind(task_id.to_string())
        .fetch_optional(store.pool())
        .await?;
    row.as_ref().map(row_to_task).transpose()
}

pub async fn get_task_by_id(store: &Store, task_id: TaskId) -> Result<Option<Task>> {
    let row = sqlx::query("SELECT * FROM tasks WHERE backend_id = ? AND id = ?")
        .bind(store.backend_id())
        .bind(task_id.to_string())
        .fetch_optional(store.pool())
        .await?;
    row.as_ref().map(row_to_task).transpose()
}

/// Look up by local numeric SQLite `rowid`, for `--local-id`.
pub async fn get_task_by_local_id(store: &Store, local_id: i64) -> Result<Option<Task>> {
    let row = sqlx::query("SELECT * FROM tasks WHERE backend_id = ? AND rowid = ?")
        .bind(store.backend_id())
        .bind(local_id)
        .fetch_optional(store.pool())
        .await?;
    row.as_ref().map(row_to_task).transpose()
}

pub async fn create_task<'e, E>(executor: E, backend_id: &str, task: &Task) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO tasks (
            id, list_id, backend_id, summary, description, status, priority,
            due, start, completed, created, modified, parent, tags,
            recurrence, recur_from_due
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.id.to_string())
    .bind(task.list_id.to_string())
    .bind(backend_id)
    .bind(&task.summary)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority as i64)
    .bind(task.due)
    .bind(task.start)
    .bind(task.completed)
    .bind(task.created)
    .bind(task.modified)
    .bind(task.parent.map(|p| p.to_string()))
    .bind(serde_json::to_string(&task.tags)?)
    .bind(&task.recurrence)
    .bind(task.recur_from_due)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_task<'e, E>(executor: E, backend_id: &str, task: &Task) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE tasks SET
            summary = ?, description = ?, status = ?, priority = ?,
            due = ?, start = ?, completed = ?, modified = ?, parent = ?,
            tags = ?, recurrence = ?, recur_from_due = ?
        WHERE backend_id = ? AND id = ?
        "#,
    )
    .bind(&task.summary)
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority as i64)
    .bind(task.due)
    .bind(task.start)
    .bind(task.completed)
    .bind(task.modified)
    .bind(task.parent.map(|p| p.to_string()))
    .bind(serde_json::to_string(&task.tags)?)
    .bind(&task.recurrence)
    .bind(task.recur_from_due)
    .bind(backend_id)
    .bind(task.id.to_string())
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("task {}", task.id)));
    }
    Ok(())
}

/// Delete a task and cascade to its descendants (FK `ON DELETE CASCADE`).
pub async fn delete_task<'e, E>(executor: E, backend_id: &str, task_id: TaskId) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM tasks WHERE backend_id = ? AND id = ?")
        .bind(backend_id)
        .bind(task_id.to_string())
        .execute(executor)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("task {task_id}")));
    }
    Ok(())
}

/// All descendants of `task_id` (not including itself), ordered deepest-first,
/// for cascade-delete queue fan-out (spec §4.7 "ordered deepest-first").
pub async fn get_descendants_deepest_first(store: &Store, list_id: ListId, task_id: TaskId) -> Result<Vec<Task>> {
    let all = get_tasks(store, list_id).await?;
    let mut by_parent: HashMap<Option<TaskId>, Vec<&Task>> = HashMap::new();
    for t in &all {
        by_parent.entry(t.parent).or_default().push(t);
    }

    let mut levels: Vec<Vec<Task>> = Vec::new();
    let mut frontier = vec![task_id];
    loop {
        let mut next_level = Vec::new();
        let mut next_frontier = Vec::new();
        for parent in &frontier {
            if let Some(children) = by_parent.get(&Some(*parent)) {
                for child in children {
                    next_level.push((*child).clone());
                    next_frontier.push(child.id);
                }
            }
        }
        if next_level.is_empty() {
            break;
        }
        levels.push(next_level);
        frontier = next_frontier;
    }

    Ok(levels.into_iter().rev().flatten().collect())
}

/// Database statistics: per-list task counts by status, used by `list` summaries.
pub async fn list_stats(store: &Store, list_id: ListId) -> Result<HashMap<Status, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM tasks WHERE backend_id = ? AND list_id = ? GROUP BY status",
    )
    .bind(store.backend_id())
    .bind(list_id.to_string())
    .fetch_all(store.pool())
    .await?;
    rows.into_iter()
        .map(|(s, c)| Ok((Status::from_str(&s)?, c)))
        .collect()
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    let id: String = row.try_get("id")?;
    let list_id: String = row.try_get("list_id")?;
    let status: String = row.try_get("status")?;
    let parent: Option<String> = row.try_get("parent")?;
    let tags: String = row.try_get("tags")?;
    let priority: i64 = row.try_get("priority")?;

    Ok(Task {
        id: TaskId::from_str(&id).map_err(|e| Error::Internal(format!("bad task id: {e}")))?,
        list_id: ListId::from_str(&list_id).map_err(|e| Error::Internal(format!("bad list id: {e}")))?,
        backend_id: row.try_get("backend_id")?,
        summary: row.try_get("summary")?,
        description: row.try_get("description")?,
        status: Status::from_str(&status)?,
        priority: priority.clamp(0, 9) as u8,
        due: row.try_get("due")?,
        start: row.try_get("start")?,
        completed: row.try_get("completed")?,
        created: row.try_get("created")?,
        modified: row.try_get("modified")?,
        parent: parent
            .map(|p| TaskId::from_str(&p))
            .transpose()
            .map_err(|e| Error::Internal(format!("bad parent id: {e}")))?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        recurrence: row.try_get("recurrence")?,
        recur_from_due: row.try_get("recur_from_due")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListId, Status};

    fn sample_list(now: DateTime<Utc>) -> List {
        List {
            id: ListId::new(),
            backend_id: "sqlite".to_string(),
            name: "Work".to_string(),
            color: "#FFFFFF".to_string(),
            description: None,
            modified: now,
            deleted_at: None,
        }
    }

    fn sample_task(list_id: ListId, now: DateTime<Utc>) -> Task {
        Task {
            id: TaskId::new(),
            list_id,
            backend_id: "sqlite".to_string(),
            summary: "Hello".to_string(),
            description: None,
            status: Status::Todo,
            priority: 0,
            due: None,
            start: None,
            completed: None,
            created: now,
            modified: now,
            parent: None,
            tags: vec![],
            recurrence: None,
            recur_from_due: false,
        }
    }

    #[tokio::test]
    async fn create_and_read_back_roundtrip() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        let now = Utc::now();
        let list = sample_list(now);
        create_list(store.pool(), store.backend_id(), &list).await.unwrap();

        let mut task = sample_task(list.id, now);
        task.priority = 3;
        task.tags = vec!["a".to_string(), "b".to_string()];
        create_task(store.pool(), store.backend_id(), &task).await.unwrap();

        let fetched = get_task(&store, list.id, task.id).await.unwrap().unwrap();
        assert_eq!(fetched.summary, "Hello");
        assert_eq!(fetched.priority, 3);
        assert_eq!(fetched.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn soft_delete_hides_list_from_active_queries() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        let now = Utc::now();
        let list = sample_list(now);
        create_list(store.pool(), store.backend_id(), &list).await.unwrap();

        delete_list(store.pool(), store.backend_id(), list.id, now).await.unwrap();
        assert!(get_lists(&store).await.unwrap().is_empty());
        assert_eq!(get_deleted_lists(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cascade_delete_removes_descendants() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        let now = Utc::now();
        let list = sample_list(now);
        create_list(store.pool(), store.backend_id(), &list).await.unwrap();

        let mut parent = sample_task(list.id, now);
        parent.summary = "Parent".to_string();
        create_task(store.pool(), store.backend_id(), &parent).await.unwrap();

        let mut child = sample_task(list.id, now);
        child.summary = "Child".to_string();
        child.parent = Some(parent.id);
        create_task(store.pool(), store.backend_id(), &child).await.unwrap();

        let descendants = get_descendants_deepest_first(&store, list.id, parent.id)
            .await
            .unwrap();
        assert_eq!(descendants.len(), 1);
        assert_eq!(descendants[0].id, child.id);

        delete_task(store.pool(), store.backend_id(), parent.id).await.unwrap();
        assert!(get_tasks(&store, list.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trash_auto_purge_respects_retention_window() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        let now = Utc::now();

        let mut old = sample_list(now);
        old.name = "Old".to_string();
        create_list(store.pool(), store.backend_id(), &old).await.unwrap();
        delete_list(store.pool(), store.backend_id(), old.id, now - chrono::Duration::days(8))
            .await
            .unwrap();

        let mut recent = sample_list(now);
        recent.name = "Recent".to_string();
        create_list(store.pool(), store.backend_id(), &recent).await.unwrap();
        delete_list(store.pool(), store.backend_id(), recent.id, now - chrono::Duration::days(6))
            .await
            .unwrap();

        let purged = purge_expired_trash(&store, 7, now).await.unwrap();
        assert_eq!(purged, 1);

        let remaining = get_deleted_lists(&store).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "Recent");
    }
}
