// backend/mod.rs - Backend abstraction (C2): the single capability contract
// implemented by the local store and by every remote adapter.

pub mod caldav;
pub mod file;
pub mod git;
pub mod google_tasks;
pub mod local;
pub mod msft_todo;
pub mod todoist;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Optional capability bits an adapter may or may not support (spec §4.2).
/// Adapters lacking a bit return [`crate::Error::Unsupported`] from the
/// corresponding method; the sync core skips-and-warns rather than
/// aborting the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub list_deletion: bool,
    pub list_creation: bool,
    pub sharing: bool,
    pub publishing: bool,
    pub subscriptions: bool,
}

/// A version token an adapter may attach to a remote entity for optimistic
/// concurrency. Adapters without native ETags (e.g. Todoist) populate
/// `last_modified` instead and the sync layer falls back to comparing that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagOr<T> {
    pub value: T,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl<T> EtagOr<T> {
    pub fn new(value: T, etag: Option<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            value,
            etag,
            last_modified,
        }
    }

    /// The version signal to compare: ETag when present, else last-modified
    /// stringified, matching spec §4.2/§9 "fall back to last-modified
    /// comparison" and §9 "conflict detection without vector clocks".
    pub fn version_token(&self) -> Option<String> {
        self.etag
            .clone()
            .or_else(|| self.last_modified.map(|t| t.to_rfc3339()))
    }
}

/// A backend-agnostic list as seen across the wire, keyed by the remote's
/// own stable identifier (`uid`), which the sync layer maps to/from the
/// local `ListId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteList {
    pub uid: String,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub deleted: bool,
}

/// A backend-agnostic task as seen across the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub uid: String,
    pub list_uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: u8,
    pub due: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub modified: DateTime<Utc>,
    pub parent_uid: Option<String>,
    pub tags: Vec<String>,
    pub deleted: bool,
}

/// The single capability contract every remote family and the local store
/// itself implement (spec §4.2). Adapters are stateless with respect to
/// caller identity and must be safe for concurrent use by the daemon and
/// the CLI process.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    fn backend_id(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// A cheap liveness probe bounded by the caller's timeout (spec §4.4
    /// connectivity probe); `Ok(())` means reachable.
    async fn probe(&self) -> Result<()>;

    async fn get_lists(&self) -> Result<Vec<EtagOr<RemoteList>>>;
    async fn get_list(&self, uid: &str) -> Result<Option<EtagOr<RemoteList>>>;
    async fn create_list(&self, list: &RemoteList) -> Result<EtagOr<RemoteList>>;
    async fn update_list(&self, list: &RemoteList, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteList>>;
    async fn delete_list(&self, uid: &str) -> Result<()>;
    async fn restore_list(&self, uid: &str) -> Result<()>;
    async fn purge_list(&self, uid: &str) -> Result<()>;
    async fn get_deleted_lists(&self) -> Result<Vec<EtagOr<RemoteList>>>;

    async fn get_tasks(&self, list_uid: &str) -> Result<Vec<EtagOr<RemoteTask>>>;
    async fn get_task(&self, list_uid: &str, uid: &str) -> Result<Option<EtagOr<RemoteTask>>>;
    async fn create_task(&self, task: &RemoteTask) -> Result<EtagOr<RemoteTask>>;
    async fn update_task(&self, task: &RemoteTask, precondition_etag: Option<&str>) -> Result<EtagOr<RemoteTask>>;
    async fn delete_task(&self, list_uid: &str, uid: &str) -> Result<()>;
}

pub fn unsupported(op: &str) -> crate::Error {
    crate::Error::Unsupported(op.to_string())
}
