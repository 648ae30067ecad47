// backend/file.rs - Plain JSON-file-per-list backend (C2).
//
// One directory holds `lists.json` (the list index) and one `<uid>.json`
// per list (its tasks, as an array). There is no wire protocol to speak
// of; the adapter's only job is mapping the `TaskBackend` contract onto
// flat files, using each file's mtime as the version signal an adapter
// without a server-assigned ETag falls back to.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::{Error, Result};

pub struct FileBackend {
    backend_id: String,
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileList {
    uid: String,
    name: String,
    color: Option<String>,
    description: Option<String>,
    deleted: bool,
}

impl FileBackend {
    pub fn new(backend_id: String, base_dir: PathBuf) -> Self {
        Self { backend_id, base_dir }
    }

    fn lists_index_path(&self) -> PathBuf {
        self.base_dir.join("lists.json")
    }

    fn tasks_path(&self, list_uid: &str) -> PathBuf {
        self.base_dir.join(format!("{list_uid}.json"))
    }

    async fn read_lists(&self) -> Result<Vec<FileList>> {
        let path = self.lists_index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_lists(&self, lists: &[FileList]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let bytes = serde_json::to_vec_pretty(lists)?;
        tokio::fs::write(self.lists_index_path(), bytes).await?;
        Ok(())
    }

    async fn read_tasks(&self, list_uid: &str) -> Result<Vec<RemoteTask>> {
        let path = self.tasks_path(list_uid);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_tasks(&self, list_uid: &str, tasks: &[RemoteTask]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let bytes = serde_json::to_vec_pretty(tasks)?;
        tokio::fs::write(self.tasks_path(list_uid), bytes).await?;
        Ok(())
    }

    async fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
        let meta = tokio::fs::metadata(path).await.ok()?;
        let modified = meta.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }
}

fn to_remote(f: &FileList) -> RemoteList {
    RemoteList {
        uid: f.uid.clone(),
        name: f.name.clone(),
        color: f.color.clone(),
        description: f.description.clone(),
        deleted: f.deleted,
    }
}

#[async_trait]
impl TaskBackend for FileBackend {
    fn backend_id(&self) -> &str {
        &self.backend_id
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
        tokio::fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let mtime = Self::file_mtime(&self.lists_index_path()).await;
        Ok(self
            .read_lists()
            .await?
            .iter()
            .filter(|l| !l.deleted)
            .map(|l| EtagOr::new(to_remote(l), None, mtime))
            .collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        let mtime = Self::file_mtime(&self.lists_index_path()).await;
        Ok(self
            .read_lists()
            .await?
            .into_iter()
            .find(|l| l.uid == uid)
            .map(|l| EtagOr::new(to_remote(&l), None, mtime)))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        let mut lists = self.read_lists().await?;
        let uid = if list.uid.is_empty() { Uuid::new_v4().to_string() } else { list.uid.clone() };
        let entry = FileList {
            uid: uid.clone(),
            name: list.name.clone(),
            color: list.color.clone(),
            description: list.description.clone(),
            deleted: false,
        };
        lists.push(entry.clone());
        self.write_lists(&lists).await?;
        Ok(EtagOr::new(to_remote(&entry), None, Some(Utc::now())))
    }

    async fn update_list(&self, list: &RemoteList, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        let mut lists = self.read_lists().await?;
        let entry = lists
            .iter_mut()
            .find(|l| l.uid == list.uid)
            .ok_or_else(|| Error::NotFound(format!("list {}", list.uid)))?;
        entry.name = list.name.clone();
        entry.color = list.color.clone();
        entry.description = list.description.clone();
        let updated = entry.clone();
        self.write_lists(&lists).await?;
        Ok(EtagOr::new(to_remote(&updated), None, Some(Utc::now())))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        let mut lists = self.read_lists().await?;
        let entry = lists.iter_mut().find(|l| l.uid == uid).ok_or_else(|| Error::NotFound(format!("list {uid}")))?;
        entry.deleted = true;
        self.write_lists(&lists).await
    }

    async fn restore_list(&self, uid: &str) -> Result<()> {
        let mut lists = self.read_lists().await?;
        let entry = lists.iter_mut().find(|l| l.uid == uid).ok_or_else(|| Error::NotFound(format!("list {uid}")))?;
        entry.deleted = false;
        self.write_lists(&lists).await
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        let mut lists = self.read_lists().await?;
        lists.retain(|l| l.uid != uid);
        self.write_lists(&lists).await?;
        let path = self.tasks_path(uid);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let mtime = Self::file_mtime(&self.lists_index_path()).await;
        Ok(self
            .read_lists()
            .await?
            .iter()
            .filter(|l| l.deleted)
            .map(|l| EtagOr::new(to_remote(l), None, mtime))
            .collect())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let mtime = Self::file_mtime(&self.tasks_path(list_uid)).await;
        Ok(self
            .read_tasks(list_uid)
            .await?
            .into_iter()
            .map(|t| EtagOr::new(t, None, mtime))
            .collect())
    }

    async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>> {
        let mtime = Self::file_mtime(&self.tasks_path(list_uid)).await;
        Ok(self
            .read_tasks(list_uid)
            .await?
            .into_iter()
            .find(|t| t.uid == uid)
            .map(|t| EtagOr::new(t, None, mtime)))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let mut tasks = self.read_tasks(&task.list_uid).await?;
        let mut new_task = task.clone();
        if new_task.uid.is_empty() {
            new_task.uid = Uuid::new_v4().to_string();
        }
        new_task.modified = Utc::now();
        tasks.push(new_task.clone());
        self.write_tasks(&task.list_uid, &tasks).await?;
        Ok(EtagOr::new(new_task, None, Some(Utc::now())))
    }

    async fn update_task(&self, task: &RemoteTask, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        let mut tasks = self.read_tasks(&task.list_uid).await?;
        let entry = tasks
            .iter_mut()
            .find(|t| t.uid == task.uid)
            .ok_or_else(|| Error::NotFound(format!("task {}", task.uid)))?;
        *entry = task.clone();
        entry.modified = Utc::now();
        let updated = entry.clone();
        self.write_tasks(&task.list_uid, &tasks).await?;
        Ok(EtagOr::new(updated, None, Some(Utc::now())))
    }

    async fn delete_task(&self, list_uid: &str, uid: &str) -> Result<()> {
        let mut tasks = self.read_tasks(list_uid).await?;
        tasks.retain(|t| t.uid != uid);
        self.write_tasks(list_uid, &tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_list_then_create_task_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new("file-test".to_string(), dir.path().to_path_buf());
        let list = backend
            .create_list(&RemoteList { uid: String::new(), name: "Groceries".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        let task = backend
            .create_task(&RemoteTask {
                uid: String::new(),
                list_uid: list.value.uid.clone(),
                summary: "Buy milk".to_string(),
                description: None,
                status: "TODO".to_string(),
                priority: 0,
                due: None,
                start: None,
                completed: None,
                modified: Utc::now(),
                parent_uid: None,
                tags: Vec::new(),
                deleted: false,
            })
            .await
            .unwrap();
        let fetched = backend.get_tasks(&list.value.uid).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].value.uid, task.value.uid);
    }

    #[tokio::test]
    async fn soft_deleted_list_is_excluded_from_active_listing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new("file-test".to_string(), dir.path().to_path_buf());
        let list = backend
            .create_list(&RemoteList { uid: String::new(), name: "Archive".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        backend.delete_list(&list.value.uid).await.unwrap();
        assert!(backend.get_lists().await.unwrap().is_empty());
        assert_eq!(backend.get_deleted_lists().await.unwrap().len(), 1);
    }
}
