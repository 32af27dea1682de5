use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::flow::ReactiveFlow;
use crate::id::generate_id;
use crate::schedule::TaskSchedule;
use crate::time::lenient;
use crate::triggers::{TriggerCatalog, TriggerConfig, TriggerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Cancelled,
    Overdue,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Overdue => "overdue",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "active" => Some(TaskStatus::Active),
            "completed" => Some(TaskStatus::Completed),
            "cancelled" => Some(TaskStatus::Cancelled),
            "overdue" => Some(TaskStatus::Overdue),
            _ => None,
        }
    }

    /// Completed and cancelled tasks take no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

/// Value stored in a task's open `extra` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ExtraValue {
    Text(String),
    Number(f64),
    Flag(bool),
    #[serde(with = "time::serde::rfc3339")]
    Date(OffsetDateTime),
}

impl ExtraValue {
    /// JSON form used when the value is exposed to condition expressions.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ExtraValue::Text(s) => serde_json::Value::String(s.clone()),
            ExtraValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ExtraValue::Flag(b) => serde_json::Value::Bool(*b),
            ExtraValue::Date(d) => serde_json::Value::String(crate::time::format_datetime(*d)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Owner of the task; filled from `subjectRole` for triggered tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performer: Option<String>,
    #[serde(
        default,
        with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub activation_date: Option<OffsetDateTime>,
    /// Trigger ids; references into the catalog, not ownership
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_triggers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<TaskSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_config: Option<TriggerConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactive_flows: Vec<ReactiveFlow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_measure_id: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, ExtraValue>,
}

impl Task {
    /// New pending task with a generated id.
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(generate_id(), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            category: None,
            performer: None,
            due_date: None,
            activation_date: None,
            start_triggers: Vec::new(),
            schedule: None,
            trigger_config: None,
            reactive_flows: Vec::new(),
            source_template_id: None,
            source_template_name: None,
            quality_measure_id: None,
            extra: IndexMap::new(),
        }
    }

    /// Start triggers known to `catalog`. Retired ids are skipped.
    pub fn resolved_start_triggers<'a>(&self, catalog: &'a TriggerCatalog) -> Vec<&'a TriggerEvent> {
        self.start_triggers
            .iter()
            .filter_map(|id| catalog.lookup(id))
            .collect()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// JSON view handed to condition expressions.
    pub fn to_scope(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("reactiveFlows");
            let extra: serde_json::Map<String, serde_json::Value> = self
                .extra
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            obj.insert("extra".to_string(), serde_json::Value::Object(extra));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("Check blood pressure");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_task_deserialization_camel_case() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "title": "Follow-up call",
            "status": "active",
            "priority": "high",
            "dueDate": "2024-06-04T00:00:00Z",
            "startTriggers": ["appointment_missed", "retired_trigger"],
            "extra": {
                "location": {"type": "text", "value": "clinic"},
                "fasting": {"type": "flag", "value": true}
            }
        }))
        .unwrap();

        assert_eq!(task.status, TaskStatus::Active);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.due_date, Some(datetime!(2024-06-04 00:00:00 UTC)));
        assert_eq!(task.extra.get("fasting"), Some(&ExtraValue::Flag(true)));
    }

    #[test]
    fn test_resolved_start_triggers_skip_unknown() {
        let mut task = Task::with_id("t1", "Call patient");
        task.start_triggers = vec!["appointment_missed".into(), "retired_trigger".into()];
        let resolved = task.resolved_start_triggers(TriggerCatalog::standard());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id.as_str(), "appointment_missed");
    }

    #[test]
    fn test_task_scope_flattens_extra() {
        let mut task = Task::with_id("t1", "Weigh in");
        task.extra.insert("targetKg".into(), ExtraValue::Number(80.0));
        let scope = task.to_scope();
        assert_eq!(scope["extra"]["targetKg"], json!(80.0));
        assert_eq!(scope["status"], "pending");
        assert!(scope.get("reactiveFlows").is_none());
    }

    #[test]
    fn test_status_helpers() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::Overdue.is_terminal());
        assert_eq!(TaskStatus::from_str("overdue"), Some(TaskStatus::Overdue));
        assert_eq!(TaskStatus::from_str("done"), None);
    }
}
