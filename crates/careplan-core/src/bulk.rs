//! Bulk edits over several tasks of one goal.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use time::OffsetDateTime;

use crate::duration::DurationSpec;
use crate::error::{CoreError, Result};
use crate::model::{Goal, TaskPriority, TaskStatus};
use crate::time::lenient;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTaskUpdate {
    pub task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performer: Option<String>,
    #[serde(
        default,
        with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<OffsetDateTime>,
    /// Move each selected task's existing due date later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_due_by: Option<DurationSpec>,
}

impl BulkTaskUpdate {
    pub fn for_tasks<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task_ids: ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn has_changes(&self) -> bool {
        self.status.is_some()
            || self.priority.is_some()
            || self.performer.is_some()
            || self.due_date.is_some()
            || self.shift_due_by.is_some()
    }

    fn validate(&self, goal: &Goal) -> Result<()> {
        if self.task_ids.is_empty() {
            return Err(CoreError::validation("bulk update selects no tasks"));
        }
        if !self.has_changes() {
            return Err(CoreError::validation("bulk update changes no fields"));
        }
        if self.due_date.is_some() && self.shift_due_by.is_some() {
            return Err(CoreError::validation(
                "bulk update cannot both set and shift the due date",
            ));
        }
        let unknown: Vec<&str> = self
            .task_ids
            .iter()
            .filter(|id| goal.task(id).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(CoreError::validation(format!(
                "unknown task ids in goal {}: {}",
                goal.id,
                unknown.join(", ")
            )));
        }
        Ok(())
    }
}

impl Goal {
    /// Pure transition: the goal with `update` applied to its selected tasks.
    ///
    /// On error `self` is untouched. Tasks without a due date are left
    /// alone by `shiftDueBy`.
    pub fn apply(&self, update: &BulkTaskUpdate) -> Result<Goal> {
        update.validate(self)?;

        let selected: HashSet<&str> = update.task_ids.iter().map(String::as_str).collect();
        let mut next = self.clone();
        for task in next.tasks.iter_mut().filter(|t| selected.contains(t.id.as_str())) {
            if let Some(status) = update.status {
                task.status = status;
            }
            if let Some(priority) = update.priority {
                task.priority = priority;
            }
            if let Some(performer) = &update.performer {
                task.performer = Some(performer.clone());
            }
            if let Some(due) = update.due_date {
                task.due_date = Some(due);
            }
            if let (Some(shift), Some(due)) = (update.shift_due_by, task.due_date) {
                task.due_date = Some(shift.after(due)?);
            }
        }
        Ok(next)
    }
}
