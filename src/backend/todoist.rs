// backend/todoist.rs - Todoist REST v2 over `reqwest` JSON (C2)
//
// Todoist has no per-item ETag; every response instead is compared via
// `modified_at`. This is the adapter spec §4.2 calls out specifically as
// exercising the "adapters may not provide ETags... fall back to
// last-modified comparison" fallback path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{unsupported, Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::{Error, Result};

const BASE_URL: &str = "https://api.todoist.com/rest/v2";

pub struct TodoistBackend {
    backend_id: String,
    api_token: String,
    client: reqwest::Client,
}

impl TodoistBackend {
    pub fn new(backend_id: String, api_token: String) -> Self {
        Self {
            backend_id,
            api_token,
            client: reqwest::Client::new(),
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TdProject {
    id: String,
    name: String,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TdDue {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    datetime: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TdTask {
    id: String,
    project_id: String,
    content: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_completed: bool,
    /// Todoist priority is 1 (normal) to 4 (urgent); inverted from this
    /// crate's 1=highest convention, remapped at the boundary.
    priority: i64,
    #[serde(default)]
    due: Option<TdDue>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

fn todoist_priority_to_local(p: i64) -> u8 {
    match p {
        4 => 1,
        3 => 3,
        2 => 6,
        _ => 0,
    }
}

fn local_priority_to_todoist(p: u8) -> i64 {
    match p {
        1..=2 => 4,
        3..=4 => 3,
        5..=9 => 2,
        _ => 1,
    }
}

fn parse_due(due: &Option<TdDue>) -> Option<DateTime<Utc>> {
    let due = due.as_ref()?;
    if let Some(dt) = &due.datetime {
        return DateTime::parse_from_rfc3339(dt).ok().map(|d| d.with_timezone(&Utc));
    }
    if let Some(d) = &due.date {
        return chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .ok()
            .map(|d| DateTime::from_naive_utc_and_offset(d.and_hms_opt(0, 0, 0).unwrap(), Utc));
    }
    None
}

fn task_to_remote(t: &TdTask) -> RemoteTask {
    let now = Utc::now();
    RemoteTask {
        uid: t.id.clone(),
        list_uid: t.project_id.clone(),
        summary: t.content.clone(),
        description: t.description.clone(),
        status: if t.is_completed { "DONE".to_string() } else { "TODO".to_string() },
        priority: todoist_priority_to_local(t.priority),
        due: parse_due(&t.due),
        start: None,
        completed: if t.is_completed { Some(now) } else { None },
        // Todoist's REST API doesn't expose a per-task `updated_at`; `now`
        // as a last-modified stand-in means the sync layer will treat every
        // pull as "possibly changed" rather than silently trusting staleness.
        modified: now,
        parent_uid: t.parent_id.clone(),
        tags: t.labels.clone(),
        deleted: false,
    }
}

#[async_trait]
impl TaskBackend for TodoistBackend {
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
        let resp = self.auth(self.client.get(format!("{BASE_URL}/projects"))).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Network(format!("todoist probe failed: {}", resp.status())))
        }
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let projects: Vec<TdProject> = self
            .auth(self.client.get(format!("{BASE_URL}/projects")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(projects
            .into_iter()
            .filter(|p| !p.is_deleted)
            .map(|p| EtagOr::new(RemoteList { uid: p.id, name: p.name, color: None, description: None, deleted: false }, None, Some(Utc::now())))
            .collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        Ok(self.get_lists().await?.into_iter().find(|l| l.value.uid == uid))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        let created: TdProject = self
            .auth(self.client.post(format!("{BASE_URL}/projects")))
            .json(&serde_json::json!({ "name": list.name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EtagOr::new(RemoteList { uid: created.id, name: created.name, color: None, description: None, deleted: false }, None, Some(Utc::now())))
    }

    async fn update_list(&self, list: &RemoteList, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        self.auth(self.client.post(format!("{BASE_URL}/projects/{}", list.uid)))
            .json(&serde_json::json!({ "name": list.name }))
            .send()
            .await?
            .error_for_status()?;
        Ok(EtagOr::new(list.clone(), None, Some(Utc::now())))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        self.auth(self.client.delete(format!("{BASE_URL}/projects/{uid}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn restore_list(&self, _uid: &str) -> Result<()> {
        Err(unsupported("todoist: restore_list"))
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        self.delete_list(uid).await
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        Ok(Vec::new())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let tasks: Vec<TdTask> = self
            .auth(self.client.get(format!("{BASE_URL}/tasks")).query(&[("project_id", list_uid)]))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(tasks.iter().map(|t| {
            let remote = task_to_remote(t);
            EtagOr::new(remote.clone(), None, Some(remote.modified))
        }).collect())
    }

    async fn get_task(&self, _list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>> {
        let resp = self.auth(self.client.get(format!("{BASE_URL}/tasks/{uid}"))).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let t: TdTask = resp.error_for_status()?.json().await?;
        let remote = task_to_remote(&t);
        Ok(Some(EtagOr::new(remote.clone(), None, Some(remote.modified))))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let created: TdTask = self
            .auth(self.client.post(format!("{BASE_URL}/tasks")))
            .json(&serde_json::json!({
                "content": task.summary,
                "description": task.description,
                "project_id": task.list_uid,
                "priority": local_priority_to_todoist(task.priority),
                "parent_id": task.parent_uid,
                "labels": task.tags,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let remote = task_to_remote(&created);
        Ok(EtagOr::new(remote.clone(), None, Some(remote.modified)))
    }

    async fn update_task(&self, task: &RemoteTask, _precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        self.auth(self.client.post(format!("{BASE_URL}/tasks/{}", task.uid)))
            .json(&serde_json::json!({
                "content": task.summary,
                "description": task.description,
                "priority": local_priority_to_todoist(task.priority),
                "labels": task.tags,
            }))
            .send()
            .await?
            .error_for_status()?;

        if task.status == "DONE" {
            self.auth(self.client.post(format!("{BASE_URL}/tasks/{}/close", task.uid)))
                .send()
                .await?
                .error_for_status()?;
        } else {
            self.auth(self.client.post(format!("{BASE_URL}/tasks/{}/reopen", task.uid)))
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(EtagOr::new(task.clone(), None, Some(Utc::now())))
    }

    async fn delete_task(&self, _list_uid: &str, uid: &str) -> Result<()> {
        self.auth(self.client.delete(format!("{BASE_URL}/tasks/{uid}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping_round_trips_through_buckets() {
        assert_eq!(todoist_priority_to_local(4), 1);
        assert_eq!(todoist_priority_to_local(1), 0);
        assert_eq!(local_priority_to_todoist(1), 4);
        assert_eq!(local_priority_to_todoist(9), 2);
    }
}
