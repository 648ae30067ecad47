// backend/msft_todo.rs - Microsoft Graph `/me/todo` over `reqwest` JSON (C2).
//
// Graph resources carry `@odata.etag`, exercised here the same way
// Google Tasks exercises its native `etag`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{unsupported, Capabilities, EtagOr, RemoteList, RemoteTask, TaskBackend};
use crate::{Error, Result};

const BASE_URL: &str = "https://graph.microsoft.com/v1.0/me/todo";

pub struct MsftTodoBackend {
    backend_id: String,
    access_token: String,
    client: reqwest::Client,
}

impl MsftTodoBackend {
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
struct MsList {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "@odata.etag", default)]
    etag: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MsListsResponse {
    #[serde(default)]
    value: Vec<MsList>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MsDateTimeTimeZone {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(default)]
    #[allow(dead_code)]
    timezone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MsItemBody {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MsTask {
    id: String,
    title: String,
    #[serde(default)]
    body: Option<MsItemBody>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "dueDateTime")]
    due_date_time: Option<MsDateTimeTimeZone>,
    #[serde(default, rename = "completedDateTime")]
    completed_date_time: Option<MsDateTimeTimeZone>,
    #[serde(default, rename = "lastModifiedDateTime")]
    last_modified_date_time: Option<String>,
    #[serde(rename = "@odata.etag", default)]
    etag: Option<String>,
    #[serde(default)]
    importance: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MsTasksResponse {
    #[serde(default)]
    value: Vec<MsTask>,
}

fn parse_graph_datetime(dt: &Option<MsDateTimeTimeZone>) -> Option<DateTime<Utc>> {
    let dt = dt.as_ref()?;
    // Graph returns timestamps without a trailing zone offset; they're UTC.
    let normalized = if dt.date_time.ends_with('Z') {
        dt.date_time.clone()
    } else {
        format!("{}Z", dt.date_time)
    };
    DateTime::parse_from_rfc3339(&normalized).ok().map(|d| d.with_timezone(&Utc))
}

fn parse_rfc3339(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|d| d.with_timezone(&Utc))
}

fn importance_to_priority(importance: &Option<String>) -> u8 {
    match importance.as_deref() {
        Some("high") => 2,
        Some("low") => 7,
        _ => 5,
    }
}

fn priority_to_importance(priority: u8) -> &'static str {
    match priority {
        1..=3 => "high",
        4..=6 => "normal",
        _ if priority == 0 => "normal",
        _ => "low",
    }
}

fn list_to_remote(l: &MsList) -> RemoteList {
    RemoteList {
        uid: l.id.clone(),
        name: l.display_name.clone(),
        color: None,
        description: None,
        deleted: false,
    }
}

fn task_to_remote(t: &MsTask, list_uid: &str) -> RemoteTask {
    let status = match t.status.as_deref() {
        Some("completed") => "DONE",
        Some("inProgress") => "IN_PROGRESS",
        _ => "TODO",
    };
    RemoteTask {
        uid: t.id.clone(),
        list_uid: list_uid.to_string(),
        summary: t.title.clone(),
        description: t.body.as_ref().and_then(|b| b.content.clone()),
        status: status.to_string(),
        priority: importance_to_priority(&t.importance),
        due: parse_graph_datetime(&t.due_date_time),
        start: None,
        completed: parse_graph_datetime(&t.completed_date_time),
        modified: parse_rfc3339(&t.last_modified_date_time).unwrap_or_else(Utc::now),
        parent_uid: None,
        tags: Vec::new(),
        deleted: false,
    }
}

#[async_trait]
impl TaskBackend for MsftTodoBackend {
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
        let resp = self.auth(self.client.get(format!("{BASE_URL}/lists"))).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Network(format!("msft todo probe failed: {}", resp.status())))
        }
    }

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        let body: MsListsResponse = self
            .auth(self.client.get(format!("{BASE_URL}/lists")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.value.iter().map(|l| EtagOr::new(list_to_remote(l), l.etag.clone(), None)).collect())
    }

    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>> {
        let resp = self.auth(self.client.get(format!("{BASE_URL}/lists/{uid}"))).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let l: MsList = resp.error_for_status()?.json().await?;
        Ok(Some(EtagOr::new(list_to_remote(&l), l.etag.clone(), None)))
    }

    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>> {
        let created: MsList = self
            .auth(self.client.post(format!("{BASE_URL}/lists")))
            .json(&serde_json::json!({ "displayName": list.name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EtagOr::new(list_to_remote(&created), created.etag.clone(), None))
    }

    async fn update_list(&self, list: &RemoteList, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>> {
        let mut req = self
            .auth(self.client.patch(format!("{BASE_URL}/lists/{}", list.uid)))
            .json(&serde_json::json!({ "displayName": list.name }));
        if let Some(etag) = precondition_etag {
            req = req.header("If-Match", etag);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Err(Error::Conflict(format!("list {} changed remotely", list.uid)));
        }
        let updated: MsList = resp.error_for_status()?.json().await?;
        Ok(EtagOr::new(list_to_remote(&updated), updated.etag.clone(), None))
    }

    async fn delete_list(&self, uid: &str) -> Result<()> {
        self.auth(self.client.delete(format!("{BASE_URL}/lists/{uid}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn restore_list(&self, _uid: &str) -> Result<()> {
        Err(unsupported("msft_todo: restore_list"))
    }

    async fn purge_list(&self, uid: &str) -> Result<()> {
        self.delete_list(uid).await
    }

    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>> {
        Ok(Vec::new())
    }

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>> {
        let body: MsTasksResponse = self
            .auth(self.client.get(format!("{BASE_URL}/lists/{list_uid}/tasks")))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body
            .value
            .iter()
            .map(|t| EtagOr::new(task_to_remote(t, list_uid), t.etag.clone(), None))
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
        let t: MsTask = resp.error_for_status()?.json().await?;
        Ok(Some(EtagOr::new(task_to_remote(&t, list_uid), t.etag.clone(), None)))
    }

    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>> {
        let mut payload = serde_json::json!({
            "title": task.summary,
            "importance": priority_to_importance(task.priority),
        });
        if let Some(desc) = &task.description {
            payload["body"] = serde_json::json!({ "content": desc, "contentType": "text" });
        }
        if let Some(due) = task.due {
            payload["dueDateTime"] = serde_json::json!({ "dateTime": due.to_rfc3339(), "timeZone": "UTC" });
        }
        let created: MsTask = self
            .auth(self.client.post(format!("{BASE_URL}/lists/{}/tasks", task.list_uid)))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(EtagOr::new(task_to_remote(&created, &task.list_uid), created.etag.clone(), None))
    }

    async fn update_task(&self, task: &RemoteTask, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>> {
        let status = match task.status.as_str() {
            "DONE" => "completed",
            "IN_PROGRESS" => "inProgress",
            _ => "notStarted",
        };
        let payload = serde_json::json!({
            "title": task.summary,
            "status": status,
            "importance": priority_to_importance(task.priority),
        });
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
        let updated: MsTask = resp.error_for_status()?.json().await?;
        Ok(EtagOr::new(task_to_remote(&updated, &task.list_uid), updated.etag.clone(), None))
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
    fn importance_mapping_round_trips_buckets() {
        assert_eq!(priority_to_importance(importance_to_priority(&Some("high".to_string()))), "high");
        assert_eq!(priority_to_importance(importance_to_priority(&Some("low".to_string()))), "low");
    }
}
