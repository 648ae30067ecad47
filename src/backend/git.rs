// backend/git.rs - git2-backed JSON-per-list backend (C2).
//
// Same on-disk layout as `backend::file`, but every mutation is committed
// to a git repository at `base_dir`; the resulting commit hash is used as
// the adapter's ETag, giving it a real version token without a server.
// `git2` is synchronous, so every call runs inside `spawn_blocking`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::{Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::{Error, Result};

pub struct GitBackend {
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

fn to_remote(f: &FileList) -> RemoteList {
    RemoteList { uid: f.uid.clone(), name: f.name.clone(), color: f.color.clone(), description: f.description.clone(), deleted: f.deleted }
}

fn open_or_init_repo(base_dir: &std::path::Path) -> Result<git2::Repository> {
    std::fs::create_dir_all(base_dir)?;
    match git2::Repository::open(base_dir) {
        Ok(repo) => Ok(repo),
        Err(_) => Ok(git2::Repository::init(base_dir)?),
    }
}

fn commit_all(base_dir: &std::path::Path, message: &str) -> Result<String> {
    let repo = open_or_init_repo(base_dir)?;
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;

    let signature = git2::Signature::now("todoat", "todoat@localhost")?;
    let parent = repo.head().ok().and_then(|h| h.target()).and_then(|oid| repo.find_commit(oid).ok());

    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let commit_oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
    Ok(commit_oid.to_string())
}

fn head_commit_hash(base_dir: &std::path::Path) -> Option<String> {
    let repo = git2::Repository::open(base_dir).ok()?;
    let head = repo.head().ok()?.target()?;
    Some(head.to_string())
}

impl GitBackend {
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

    async fn write_lists_and_commit(&self, lists: &[FileList], message: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let bytes = serde_json::to_vec_pretty(lists)?;
        tokio::fs::write(self.lists_index_path(), bytes).await?;
        let base_dir = self.base_dir.clone();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || commit_all(&base_dir, &message))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }

    async fn read_tasks(&self, list_uid: &str) -> Result<Vec<RemoteTask>> {
        let path = self.tasks_path(list_uid);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_tasks_and_commit(&self, list_uid: &str, tasks: &[RemoteTask], message: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let bytes = serde_json::to_vec_pretty(tasks)?;
        tokio::fs::write(self.tasks_path(list_uid), bytes).await?;
        let base_dir = self.base_dir.clone();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || commit_all(&base_dir, &message))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?
    }

    async fn current_commit(&self) -> Option<String> {
        let base_dir = self.base_dir.clone();
        tokio::task::spawn_blocking(move || head_commit_hash(&base_dir)).await.ok().flatten()
    }
}

#[async_trait]
impl TaskBackend for GitBackend {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            list_deletion: true,
            list_creation: true,
            sharing: true,
            publishing: false,
            subscriptions: false,
        }
    }

    async fn probe(&self) -> Result<()> {
        let base_dir = self.base_dir.clone();
        tokio::task::spawn_blocking(move || open_or_init_repo(&base_dir))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;
        Ok(())
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let commit = self.current_commit().await;
        Ok(self
            .read_lists()
            .await?
            .iter()
            .filter(|l| !l.deleted)
            .map(|l| EtagOr::new(to_remote(l), commit.clone(), None))
            .collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        let commit = self.current_commit().await;
        Ok(self.read_lists().await?.into_iter().find(|l| l.uid == uid).map(|l| EtagOr::new(to_remote(&l), commit, None)))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        let mut lists = self.read_lists().await?;
        let uid = if list.uid.is_empty() { Uuid::new_v4().to_string() } else { list.uid.clone() };
        let entry = FileList { uid: uid.clone(), name: list.name.clone(), color: list.color.clone(), description: list.description.clone(), deleted: false };
        lists.push(entry.clone());
        let commit = self.write_lists_and_commit(&lists, &format!("create list {uid}")).await?;
        Ok(EtagOr::new(to_remote(&entry), Some(commit), None))
    }

    async fn update_list(&self, list: &RemoteList, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        let mut lists = self.read_lists().await?;
        let entry = lists.iter_mut().find(|l| l.uid == list.uid).ok_or_else(|| Error::NotFound(format!("list {}", list.uid)))?;
        entry.name = list.name.clone();
        entry.color = list.color.clone();
        entry.description = list.description.clone();
        let updated = entry.clone();
        let commit = self.write_lists_and_commit(&lists, &format!("update list {}", list.uid)).await?;
        Ok(EtagOr::new(to_remote(&updated), Some(commit), None))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        let mut lists = self.read_lists().await?;
        let entry = lists.iter_mut().find(|l| l.uid == uid).ok_or_else(|| Error::NotFound(format!("list {uid}")))?;
        entry.deleted = true;
        self.write_lists_and_commit(&lists, &format!("delete list {uid}")).await?;
        Ok(())
    }

    async fn restore_list(&self, uid: &str) -> Result<()> {
        let mut lists = self.read_lists().await?;
        let entry = lists.iter_mut().find(|l| l.uid == uid).ok_or_else(|| Error::NotFound(format!("list {uid}")))?;
        entry.deleted = false;
        self.write_lists_and_commit(&lists, &format!("restore list {uid}")).await?;
        Ok(())
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        let mut lists = self.read_lists().await?;
        lists.retain(|l| l.uid != uid);
        self.write_lists_and_commit(&lists, &format!("purge list {uid}")).await?;
        let path = self.tasks_path(uid);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            let base_dir = self.base_dir.clone();
            tokio::task::spawn_blocking(move || commit_all(&base_dir, "purge list tasks file"))
                .await
                .map_err(|e| Error::Internal(e.to_string()))??;
        }
        Ok(())
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let commit = self.current_commit().await;
        Ok(self
            .read_lists()
            .await?
            .iter()
            .filter(|l| l.deleted)
            .map(|l| EtagOr::new(to_remote(l), commit.clone(), None))
            .collect())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let commit = self.current_commit().await;
        Ok(self.read_tasks(list_uid).await?.into_iter().map(|t| EtagOr::new(t, commit.clone(), None)).collect())
    }

    async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>> {
        let commit = self.current_commit().await;
        Ok(self.read_tasks(list_uid).await?.into_iter().find(|t| t.uid == uid).map(|t| EtagOr::new(t, commit, None)))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let mut tasks = self.read_tasks(&task.list_uid).await?;
        let mut new_task = task.clone();
        if new_task.uid.is_empty() {
            new_task.uid = Uuid::new_v4().to_string();
        }
        new_task.modified = Utc::now();
        tasks.push(new_task.clone());
        let commit = self.write_tasks_and_commit(&task.list_uid, &tasks, &format!("create task {}", new_task.uid)).await?;
        Ok(EtagOr::new(new_task, Some(commit), None))
    }

    async fn update_task(&self, task: &RemoteTask, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        let mut tasks = self.read_tasks(&task.list_uid).await?;
        let entry = tasks.iter_mut().find(|t| t.uid == task.uid).ok_or_else(|| Error::NotFound(format!("task {}", task.uid)))?;
        *entry = task.clone();
        entry.modified = Utc::now();
        let updated = entry.clone();
        let commit = self.write_tasks_and_commit(&task.list_uid, &tasks, &format!("update task {}", task.uid)).await?;
        Ok(EtagOr::new(updated, Some(commit), None))
    }

    async fn delete_task(&self, list_uid: &str, uid: &str) -> Result<()> {
        let mut tasks = self.read_tasks(list_uid).await?;
        tasks.retain(|t| t.uid != uid);
        self.write_tasks_and_commit(list_uid, &tasks, &format!("delete task {uid}")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_list_produces_a_commit_hash_as_etag() {
        let dir = tempfile::tempdir().unwrap();
        let backend = GitBackend::new("git-test".to_string(), dir.path().to_path_buf());
        backend.probe().await.unwrap();
        let list = backend
            .create_list(&RemoteList { uid: String::new(), name: "Home".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        assert!(list.etag.is_some());
        assert_eq!(list.etag, backend.current_commit().await);
    }

    #[tokio::test]
    async fn each_mutation_advances_the_commit_hash() {
        let dir = tempfile::tempdir().unwrap();
        let backend = GitBackend::new("git-test".to_string(), dir.path().to_path_buf());
        backend.probe().await.unwrap();
        let list = backend
            .create_list(&RemoteList { uid: String::new(), name: "Home".to_string(), color: None, description: None, deleted: false })
            .await
            .unwrap();
        let first_commit = list.etag.clone();
        let updated = backend
            .update_list(&RemoteList { uid: list.value.uid.clone(), name: "Household".to_string(), color: None, description: None, deleted: false }, None)
            .await
            .unwrap();
        assert_ne!(first_commit, updated.etag);
    }
}
