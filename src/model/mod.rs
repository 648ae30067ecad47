// model/mod.rs - Core data model: lists, tasks, and the hierarchy/naming rules (C7)

pub mod color;
pub mod date;
pub mod glob;
pub mod path;
pub mod priority;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a list, distinct at the type level from a task id
/// so a mismatched argument is a compile error rather than a runtime one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListId(pub Uuid);

impl ListId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ListId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// An ordered container of tasks, scoped to one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    pub backend_id: String,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
    pub modified: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl List {
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Status {
    #[serde(rename = "TODO")]
    Todo,
    #[serde(rename = "IN-PROGRESS")]
    InProgress,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "TODO",
            Status::InProgress => "IN-PROGRESS",
            Status::Done => "DONE",
            Status::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for Status {
    type Err = crate::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TODO" => Ok(Status::Todo),
            "IN-PROGRESS" | "IN_PROGRESS" | "INPROGRESS" => Ok(Status::InProgress),
            "DONE" => Ok(Status::Done),
            "CANCELLED" | "CANCELED" => Ok(Status::Cancelled),
            other => Err(crate::Error::Validation(format!("invalid status: {other}"))),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work. `modified` must be monotonically non-decreasing per task;
/// callers update it through [`Task::touch`] rather than writing it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub list_id: ListId,
    pub backend_id: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: u8,
    pub due: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub parent: Option<TaskId>,
    pub tags: Vec<String>,
    pub recurrence: Option<String>,
    pub recur_from_due: bool,
}

impl Task {
    /// Advance `modified` to `now`, preserving monotonicity even if called twice
    /// within the same clock tick.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modified = self.modified.max(now);
    }

    /// Apply a status transition, handling the `completed` timestamp per
    /// the "status completion" rule: DONE sets it if null, leaving DONE clears it.
    pub fn set_status(&mut self, status: Status, now: DateTime<Utc>) {
        match (self.status, status) {
            (Status::Done, Status::Done) => {}
            (_, Status::Done) => {
                if self.completed.is_none() {
                    self.completed = Some(now);
                }
            }
            (Status::Done, _) => {
                self.completed = None;
            }
            _ => {}
        }
        self.status = status;
        self.touch(now);
    }
}
