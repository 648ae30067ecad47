// backend/local.rs - The local SQLite store as a `TaskBackend` (no network,
// always connected). This lets the sync core compare "local view" and
// "remote view" without a special case: the local side of a sync cycle
// is just another `TaskBackend` implementation.

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::{Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::db::{queries, Store};
use crate::model::{List, ListId, Status, Task, TaskId};
use crate::{Error, Result};

pub struct LocalBackend {
    store: Store,
}

impl LocalBackend {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

fn list_to_remote(list: &List) -> RemoteList {
    RemoteList {
        uid: list.id.to_string(),
        name: list.name.clone(),
        color: Some(list.color.clone()),
        description: list.description.clone(),
        deleted: list.deleted_at.is_some(),
    }
}

fn task_to_remote(task: &Task) -> RemoteTask {
    RemoteTask {
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

#[async_trait]
impl TaskBackend for LocalBackend {
    fn backend_id(&self) -> &str {
        self.store.backend_id()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            list_deletion: true,
            list_creation: true,
            sharing: false,
            publishing: false,
            subscriptions: false,
        }
    }

    async fn probe(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.store.pool()).await?;
        Ok(())
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let lists = queries::get_lists(&self.store).await?;
        Ok(lists
            .iter()
            .map(|l| EtagOr::new(list_to_remote(l), None, Some(l.modified)))
            .collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        let id: ListId = uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {uid}")))?;
        let list = queries::get_list(&self.store, id).await?;
        Ok(list.map(|l| EtagOr::new(list_to_remote(&l), None, Some(l.modified))))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        let now = Utc::now();
        let local = List {
            id: list.uid.parse().unwrap_or_default(),
            backend_id: self.store.backend_id().to_string(),
            name: list.name.clone(),
            color: list.color.clone().unwrap_or_else(|| "#808080".to_string()),
            description: list.description.clone(),
            modified: now,
            deleted_at: None,
        };
        queries::create_list(self.store.pool(), self.store.backend_id(), &local).await?;
        Ok(EtagOr::new(list_to_remote(&local), None, Some(now)))
    }

    async fn update_list(&self, list: &RemoteList, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        let id: ListId = list.uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {}", list.uid)))?;
        let mut local = queries::get_list(&self.store, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("list {}", list.uid)))?;
        local.name = list.name.clone();
        if let Some(color) = &list.color {
            local.color = color.clone();
        }
        local.description = list.description.clone();
        local.modified = Utc::now();
        queries::update_list(&self.store, &local).await?;
        Ok(EtagOr::new(list_to_remote(&local), None, Some(local.modified)))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        let id: ListId = uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {uid}")))?;
        queries::delete_list(self.store.pool(), self.store.backend_id(), id, Utc::now()).await
    }

    async fn restore_list(&self, uid: &str) -> Result<()> {
        let id: ListId = uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {uid}")))?;
        queries::restore_list(self.store.pool(), self.store.backend_id(), id, Utc::now()).await
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        let id: ListId = uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {uid}")))?;
        queries::purge_list(&self.store, id).await
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let lists = queries::get_deleted_lists(&self.store).await?;
        Ok(lists
            .iter()
            .map(|l| EtagOr::new(list_to_remote(l), None, Some(l.modified)))
            .collect())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let id: ListId = list_uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {list_uid}")))?;
        let tasks = queries::get_tasks(&self.store, id).await?;
        Ok(tasks
            .iter()
            .map(|t| EtagOr::new(task_to_remote(t), None, Some(t.modified)))
            .collect())
    }

    async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>> {
        let list_id: ListId = list_uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {list_uid}")))?;
        let task_id: TaskId = uid.parse().map_err(|_| Error::Validation(format!("bad task uid: {uid}")))?;
        let task = queries::get_task(&self.store, list_id, task_id).await?;
        Ok(task.map(|t| EtagOr::new(task_to_remote(&t), None, Some(t.modified))))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let now = Utc::now();
        let status: Status = task.status.parse().unwrap_or(Status::Todo);
        let local = Task {
            id: task.uid.parse().unwrap_or_default(),
            list_id: task.list_uid.parse().map_err(|_| Error::Validation(format!("bad list uid: {}", task.list_uid)))?,
            backend_id: self.store.backend_id().to_string(),
            summary: task.summary.clone(),
            description: task.description.clone(),
            status,
            priority: task.priority,
            due: task.due,
            start: task.start,
            completed: task.completed,
            created: now,
            modified: now,
            parent: task
                .parent_uid
                .as_ref()
                .map(|p| p.parse())
                .transpose()
                .map_err(|_| Error::Validation("bad parent uid".to_string()))?,
            tags: task.tags.clone(),
            recurrence: None,
            recur_from_due: false,
        };
        queries::create_task(self.store.pool(), self.store.backend_id(), &local).await?;
        Ok(EtagOr::new(task_to_remote(&local), None, Some(now)))
    }

    async fn update_task(&self, task: &RemoteTask, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        let task_id: TaskId = task.uid.parse().map_err(|_| Error::Validation(format!("bad task uid: {}", task.uid)))?;
        let mut local = queries::get_task_by_id(&self.store, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task.uid)))?;
        let now = Utc::now();
        local.summary = task.summary.clone();
        local.description = task.description.clone();
        local.set_status(task.status.parse().unwrap_or(local.status), now);
        local.priority = task.priority;
        local.due = task.due;
        local.start = task.start;
        local.tags = task.tags.clone();
        queries::update_task(self.store.pool(), self.store.backend_id(), &local).await?;
        Ok(EtagOr::new(task_to_remote(&local), None, Some(local.modified)))
    }

    async fn delete_task(&self, _list_uid: &str, uid: &str) -> Result<()> {
        let task_id: TaskId = uid.parse().map_err(|_| Error::Validation(format!("bad task uid: {uid}")))?;
        queries::delete_task(self.store.pool(), self.store.backend_id(), task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_is_always_connected() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        let backend = LocalBackend::new(store);
        assert!(backend.probe().await.is_ok());
        assert!(backend.capabilities().list_creation);
    }

    #[tokio::test]
    async fn create_and_fetch_list_roundtrip() {
        let (store, _dir) = Store::open_temp("sqlite").await;
        let backend = LocalBackend::new(store);
        let created = backend
            .create_list(&RemoteList {
                uid: String::new(),
                name: "Work".to_string(),
                color: Some("#ABCDEF".to_string()),
                description: None,
                deleted: false,
            })
            .await
            .unwrap();
        let fetched = backend.get_list(&created.value.uid).await.unwrap().unwrap();
        assert_eq!(fetched.value.name, "Work");
    }
}
