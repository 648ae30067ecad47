// view/mod.rs - saved view definitions (C7 external surface): named
// field/filter/sort combinations loaded from `<config_home>/todoat/views/*.yaml`
// and applied to a task list before rendering. Rendering itself (colorized
// tables, tree layout) is out of scope; this module only decides which
// tasks survive and in what order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{date, priority, Task};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub width: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// A named view: which fields to show, which tasks to keep, and in what order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

impl View {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let view: View = serde_yaml::from_str(&raw)?;
        Ok(view)
    }

    /// Load the view named `name` from `views_dir`, looking for `<name>.yaml`.
    pub fn load_named(views_dir: &Path, name: &str) -> Result<Self> {
        let path = views_dir.join(format!("{name}.yaml"));
        if !path.exists() {
            return Err(Error::NotFound(format!("view '{name}' not found in {}", views_dir.display())));
        }
        Self::load(&path)
    }

    /// Apply every filter, keeping only tasks that match all of them, then
    /// apply the sort chain (later entries break ties left by earlier ones).
    pub fn apply(&self, tasks: Vec<Task>, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Task>> {
        let mut filtered = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut keep = true;
            for filter in &self.filters {
                if !filter.matches(&task, now)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                filtered.push(task);
            }
        }
        sort_tasks(&mut filtered, &self.sort);
        Ok(filtered)
    }
}

impl FilterSpec {
    pub fn matches(&self, task: &Task, now: chrono::DateTime<chrono::Utc>) -> Result<bool> {
        match self.field.as_str() {
            "status" => {
                let want = self.value.parse::<crate::model::Status>()?;
                compare_eq(self.operator, task.status == want)
            }
            "priority" => {
                let filter = priority::parse(&self.value)?;
                match self.operator {
                    Operator::Eq | Operator::In => Ok(filter.matches(task.priority)),
                    Operator::Ne => Ok(!filter.matches(task.priority)),
                    Operator::Lt => Ok(filter.values().iter().any(|v| task.priority < *v)),
                    Operator::Lte => Ok(filter.values().iter().any(|v| task.priority <= *v)),
                    Operator::Gt => Ok(filter.values().iter().any(|v| task.priority > *v)),
                    Operator::Gte => Ok(filter.values().iter().any(|v| task.priority >= *v)),
                    Operator::Contains => Err(Error::Validation("operator 'contains' not valid for priority".into())),
                }
            }
            "tag" | "tags" => match self.operator {
                Operator::Contains | Operator::Eq | Operator::In => {
                    Ok(task.tags.iter().any(|t| t.eq_ignore_ascii_case(&self.value)))
                }
                Operator::Ne => Ok(!task.tags.iter().any(|t| t.eq_ignore_ascii_case(&self.value))),
                _ => Err(Error::Validation("operator not valid for tags".to_string())),
            },
            "summary" => match self.operator {
                Operator::Eq => Ok(task.summary.eq_ignore_ascii_case(&self.value)),
                Operator::Ne => Ok(!task.summary.eq_ignore_ascii_case(&self.value)),
                Operator::Contains => Ok(task.summary.to_lowercase().contains(&self.value.to_lowercase())),
                _ => Err(Error::Validation("operator not valid for summary".into())),
            },
            "due" => compare_date(self.operator, task.due, &self.value, now),
            "start" => compare_date(self.operator, task.start, &self.value, now),
            "created" => compare_date(self.operator, Some(task.created), &self.value, now),
            "modified" => compare_date(self.operator, Some(task.modified), &self.value, now),
            other => Err(Error::Validation(format!("unknown filter field '{other}'"))),
        }
    }
}

fn compare_eq(operator: Operator, is_equal: bool) -> Result<bool> {
    match operator {
        Operator::Eq => Ok(is_equal),
        Operator::Ne => Ok(!is_equal),
        _ => Err(Error::Validation("only eq/ne are valid for equality fields".into())),
    }
}

fn compare_date(
    operator: Operator,
    field: Option<chrono::DateTime<chrono::Utc>>,
    value: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<bool> {
    if value.eq_ignore_ascii_case("unset") || value.eq_ignore_ascii_case("none") {
        let is_unset = field.is_none();
        return match operator {
            Operator::Eq => Ok(is_unset),
            Operator::Ne => Ok(!is_unset),
            _ => Err(Error::Validation("only eq/ne are valid against 'unset'".into())),
        };
    }
    let target = date::parse(value, now)?;
    let Some(field) = field else {
        return Ok(false);
    };
    Ok(match operator {
        Operator::Eq => field == target,
        Operator::Ne => field != target,
        Operator::Lt => field < target,
        Operator::Lte => field <= target,
        Operator::Gt => field > target,
        Operator::Gte => field >= target,
        Operator::Contains | Operator::In => return Err(Error::Validation("operator not valid for dates".into())),
    })
}

fn sort_tasks(tasks: &mut [Task], sort: &[SortSpec]) {
    tasks.sort_by(|a, b| {
        for spec in sort {
            let ordering = compare_field(a, b, &spec.field);
            let ordering = match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn compare_field(a: &Task, b: &Task, field: &str) -> std::cmp::Ordering {
    match field {
        "priority" => a.priority.cmp(&b.priority),
        "summary" => a.summary.to_lowercase().cmp(&b.summary.to_lowercase()),
        "status" => a.status.as_str().cmp(b.status.as_str()),
        "due" => a.due.cmp(&b.due),
        "start" => a.start.cmp(&b.start),
        "created" => a.created.cmp(&b.created),
        "modified" => a.modified.cmp(&b.modified),
        _ => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListId, Status, TaskId};

    fn sample_task(summary: &str, priority: u8, status: Status) -> Task {
        let now = chrono::Utc::now();
        Task {
            id: TaskId::new(),
            list_id: ListId::new(),
            backend_id: "sqlite".to_string(),
            summary: summary.to_string(),
            description: None,
            status,
            priority,
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

    #[test]
    fn parses_documented_yaml_shape() {
        let yaml = r#"
name: urgent
fields:
  - name: summary
  - name: priority
    width: 4
filters:
  - field: priority
    operator: lte
    value: "3"
sort:
  - field: due
    direction: asc
"#;
        let view: View = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(view.name, "urgent");
        assert_eq!(view.fields.len(), 2);
        assert_eq!(view.filters[0].operator, Operator::Lte);
        assert_eq!(view.sort[0].direction, SortDirection::Asc);
    }

    #[test]
    fn priority_lte_filters_and_sort_orders_ascending() {
        let tasks = vec![sample_task("low", 8, Status::Todo), sample_task("high", 1, Status::Todo), sample_task("mid", 3, Status::Todo)];
        let view = View {
            name: "urgent".to_string(),
            fields: vec![],
            filters: vec![FilterSpec {
                field: "priority".to_string(),
                operator: Operator::Lte,
                value: "3".to_string(),
            }],
            sort: vec![SortSpec {
                field: "priority".to_string(),
                direction: SortDirection::Asc,
            }],
        };
        let result = view.apply(tasks, chrono::Utc::now()).unwrap();
        assert_eq!(result.iter().map(|t| t.summary.as_str()).collect::<Vec<_>>(), vec!["high", "mid"]);
    }

    #[test]
    fn tag_contains_matches_case_insensitively() {
        let mut task = sample_task("t", 5, Status::Todo);
        task.tags = vec!["Urgent".to_string()];
        let filter = FilterSpec {
            field: "tag".to_string(),
            operator: Operator::Contains,
            value: "urgent".to_string(),
        };
        assert!(filter.matches(&task, chrono::Utc::now()).unwrap());
    }

    #[test]
    fn unknown_field_is_a_validation_error() {
        let task = sample_task("t", 5, Status::Todo);
        let filter = FilterSpec {
            field: "bogus".to_string(),
            operator: Operator::Eq,
            value: "x".to_string(),
        };
        assert!(matches!(filter.matches(&task, chrono::Utc::now()), Err(Error::Validation(_))));
    }

    #[test]
    fn due_date_eq_unset_matches_tasks_without_a_due_date() {
        let task = sample_task("t", 5, Status::Todo);
        let filter = FilterSpec {
            field: "due".to_string(),
            operator: Operator::Eq,
            value: "unset".to_string(),
        };
        assert!(filter.matches(&task, chrono::Utc::now()).unwrap());
    }

    #[test]
    fn missing_view_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = View::load_named(dir.path(), "nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
