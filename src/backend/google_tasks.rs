// backend/google_tasks.rs - Google Tasks API v1 over `reqwest` JSON (C2).
//
// Unlike Todoist, every Google Tasks resource carries a native `etag`
// field, so this adapter exercises the ETag path of `EtagOr` rather than
// the last-modified fallback.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{unsupported, Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::{Error, Result};

const BASE_URL: &str = "https://tasks.googleapis.com/tasks/v1";

pub struct GoogleTasksBackend {
    backend_id: String,
    access_token: String,
    client: reqwest::Client,
}

impl GoogleTasksBackend {
    pub fn new(backend_id: String, access_token: String) -> Self {
        Self {
            backend_id,
            access_token,
            client: reqwest::Client::new(),
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GTaskList {
    id: String,
    title: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    updated: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GTaskListsResponse {
    #[serde(default)]
    items: Vec<GTaskList>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GTask {
    id: String,
    title: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    completed: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct GTasksResponse {
    #[serde(default)]
    items: Vec<GTask>,
}

fn parse_rfc3339(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn list_to_remote(l: &GTaskList) -> RemoteList {
    RemoteList {
        uid: l.id.clone(),
        name: l.title.clone(),
        color: None,
        description: None,
        deleted: false,
    }
}

fn task_to_remote(t: &GTask, list_uid: &str) -> RemoteTask {
    let status = match t.status.as_deref() {
        Some("completed") => "DONE",
        _ => "TODO",
    };
    RemoteTask {
        uid: t.id.clone(),
        list_uid: list_uid.to_string(),
        summary: t.title.clone(),
        description: t.notes.clone(),
        status: status.to_string(),
        priority: 0,
        due: parse_rfc3339(&t.due),
        start: None,
        completed: parse_rfc3339(&t.completed),
        modified: parse_rfc3339(&t.updated).unwrap_or_else(Utc::now),
        parent_uid: t.parent.clone(),
        tags: Vec::new(),
        deleted: t.deleted,
    }
}

#[async_trait]
impl TaskBackend for GoogleTasksBackend {
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
        let resp = self
            .auth(self.client.get(format!("{BASE_URL}/users/@me/lists")))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Network(format!("google tasks probe failed: {}", resp.status())))
        }
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let body: GTaskListsResponse = self
            .auth(self.client.get(format!("{BASE_URL}/users/@me/lists")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body
            .items
            .iter()
            .map(|l| EtagOr::new(list_to_remote(l), l.etag.clone(), parse_rfc3339(&l.updated)))
            .collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        let resp = self
            .auth(self.client.get(format!("{BASE_URL}/users/@me/lists/{uid}")))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let l: GTaskList = resp.error_for_status()?.json().await?;
        Ok(Some(EtagOr::new(list_to_remote(&l), l.etag.clone(), parse_rfc3339(&l.updated))))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        let created: GTaskList = self
            .auth(self.client.post(format!("{BASE_URL}/users/@me/lists")))
            .json(&serde_json::json!({ "title": list.name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EtagOr::new(list_to_remote(&created), created.etag.clone(), parse_rfc3339(&created.updated)))
    }

    async fn update_list(&self, list: &RemoteList, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        let mut req = self
            .auth(self.client.patch(format!("{BASE_URL}/users/@me/lists/{}", list.uid)))
            .json(&serde_json::json!({ "title": list.name }));
        if let Some(etag) = precondition_etag {
            req = req.header("If-Match", etag);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Err(Error::Conflict(format!("list {} changed remotely", list.uid)));
        }
        let updated: GTaskList = resp.error_for_status()?.json().await?;
        Ok(EtagOr::new(list_to_remote(&updated), updated.etag.clone(), parse_rfc3339(&updated.updated)))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        self.auth(self.client.delete(format!("{BASE_URL}/users/@me/lists/{uid}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn restore_list(&self, _uid: &str) -> Result<()> {
        Err(unsupported("google_tasks: restore_list"))
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        self.delete_list(uid).await
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        Ok(Vec::new())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let body: GTasksResponse = self
            .auth(
                self.client
                    .get(format!("{BASE_URL}/lists/{list_uid}/tasks"))
                    .query(&[("showDeleted", "true"), ("showCompleted", "true")]),
            )
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body
            .items
            .iter()
            .map(|t| EtagOr::new(task_to_remote(t, list_uid), t.etag.clone(), parse_rfc3339(&t.updated)))
            .collect())
    }

    async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>> {
        let resp = self
            .auth(self.client.get(format!("{BASE_URL}/lists/{list_uid}/tasks/{uid}")))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let t: GTask = resp.error_for_status()?.json().await?;
        Ok(Some(EtagOr::new(task_to_remote(&t, list_uid), t.etag.clone(), parse_rfc3339(&t.updated))))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let mut payload = serde_json::json!({
            "title": task.summary,
            "notes": task.description,
        });
        if let Some(due) = task.due {
            payload["due"] = serde_json::json!(due.to_rfc3339());
        }
        if let Some(parent) = &task.parent_uid {
            payload["parent"] = serde_json::json!(parent);
        }
        let created: GTask = self
            .auth(self.client.post(format!("{BASE_URL}/lists/{}/tasks", task.list_uid)))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EtagOr::new(
            task_to_remote(&created, &task.list_uid),
            created.etag.clone(),
            parse_rfc3339(&created.updated),
        ))
    }

    async fn update_task(&self, task: &RemoteTask, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        let mut payload = serde_json::json!({
            "title": task.summary,
            "notes": task.description,
            "status": if task.status == "DONE" { "completed" } else { "needsAction" },
        });
        if let Some(due) = task.due {
            payload["due"] = serde_json::json!(due.to_rfc3339());
        }
        let mut req = self
            .auth(self.client.patch(format!("{BASE_URL}/lists/{}/tasks/{}", task.list_uid, task.uid)))
            .json(&payload);
        if let Some(etag) = precondition_etag {
            req = req.header("If-Match", etag);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Err(Error::Conflict(format!("task {} changed remotely", task.uid)));
        }
        let updated: GTask = resp.error_for_status()?.json().await?;
        Ok(EtagOr::new(
            task_to_remote(&updated, &task.list_uid),
            updated.etag.clone(),
            parse_rfc3339(&updated.updated),
        ))
    }

    async fn delete_task(&self, list_uid: &str, uid: &str) -> Result<()> {
        self.auth(self.client.delete(format!("{BASE_URL}/lists/{list_uid}/tasks/{uid}")))
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
    fn status_mapping_treats_anything_but_completed_as_todo() {
        let t = GTask {
            id: "1".into(),
            title: "x".into(),
            notes: None,
            status: Some("needsAction".into()),
            due: None,
            completed: None,
            updated: None,
            parent: None,
            etag: None,
            deleted: false,
        };
        assert_eq!(task_to_remote(&t, "list").status, "TODO");
    }
}
