use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::id::generate_id;
use crate::quality::QualityMeasure;
use crate::time::lenient;

use super::task::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Proposed,
    Active,
    Achieved,
    Cancelled,
}

/// Measured quantity tracked for a goal. Unique by `name` within a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalMetric {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    /// How often it is measured, e.g. "daily"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

impl GoalMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: None,
            target_value: None,
            current_value: None,
            frequency: None,
        }
    }

    /// Overlay the fields set in `partial`, keeping the rest.
    pub fn merge(&mut self, partial: &GoalMetric) {
        if partial.unit.is_some() {
            self.unit.clone_from(&partial.unit);
        }
        if partial.target_value.is_some() {
            self.target_value = partial.target_value;
        }
        if partial.current_value.is_some() {
            self.current_value = partial.current_value;
        }
        if partial.frequency.is_some() {
            self.frequency.clone_from(&partial.frequency);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Between,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementTarget {
    pub metric_name: String,
    pub comparator: Comparator,
    pub value: f64,
    /// Inclusive upper bound for `between`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_value: Option<f64>,
}

impl MeasurementTarget {
    pub fn is_met(&self, observed: f64) -> bool {
        match self.comparator {
            Comparator::Lt => observed < self.value,
            Comparator::Le => observed <= self.value,
            Comparator::Eq => (observed - self.value).abs() < f64::EPSILON,
            Comparator::Ge => observed >= self.value,
            Comparator::Gt => observed > self.value,
            Comparator::Between => match self.upper_value {
                Some(upper) => observed >= self.value && observed <= upper,
                None => false,
            },
        }
    }
}

/// Task template instantiated when its trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTask {
    pub id: String,
    pub trigger: String,
    pub task_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTableEntry {
    #[serde(with = "lenient")]
    pub recorded_at: OffsetDateTime,
    pub values: IndexMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Partial goal produced by a suggestion; only the set fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GoalStatus>,
    #[serde(
        default,
        with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<GoalMetric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measurement_targets: Vec<MeasurementTarget>,
}

impl GoalPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.target_date.is_none()
            && self.metrics.is_empty()
            && self.measurement_targets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Diagnosis the goal addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(
        default,
        with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub metrics: Vec<GoalMetric>,
    #[serde(default)]
    pub measurement_targets: Vec<MeasurementTarget>,
    #[serde(default)]
    pub event_tasks: Vec<EventTask>,
    #[serde(default)]
    pub data_table: Vec<DataTableEntry>,
    #[serde(default)]
    pub linked_quality_measures: Vec<String>,
}

impl Goal {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(generate_id(), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            condition: None,
            status: GoalStatus::Proposed,
            target_date: None,
            tasks: Vec::new(),
            metrics: Vec::new(),
            measurement_targets: Vec::new(),
            event_tasks: Vec::new(),
            data_table: Vec::new(),
            linked_quality_measures: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------------

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Append a task. Ids must be unique within the goal.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.task(&task.id).is_some() {
            return Err(CoreError::conflict("Task", task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Replace the task with the same id, appending it when absent.
    pub fn replace_task(&mut self, task: Task) -> Option<Task> {
        match self.task_mut(&task.id) {
            Some(existing) => Some(std::mem::replace(existing, task)),
            None => {
                self.tasks.push(task);
                None
            }
        }
    }

    pub fn remove_task(&mut self, id: &str) -> Option<Task> {
        let index = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(index))
    }

    // ------------------------------------------------------------------------
    // Metrics and targets
    // ------------------------------------------------------------------------

    pub fn metric(&self, name: &str) -> Option<&GoalMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Insert a metric, replacing the one with the same name.
    pub fn upsert_metric(&mut self, metric: GoalMetric) -> Option<GoalMetric> {
        match self.metrics.iter_mut().find(|m| m.name == metric.name) {
            Some(existing) => Some(std::mem::replace(existing, metric)),
            None => {
                self.metrics.push(metric);
                None
            }
        }
    }

    pub fn remove_metric(&mut self, name: &str) -> Option<GoalMetric> {
        let index = self.metrics.iter().position(|m| m.name == name)?;
        Some(self.metrics.remove(index))
    }

    /// Record a data-table row and refresh `currentValue` of matching metrics.
    pub fn record_data(&mut self, entry: DataTableEntry) {
        for (name, value) in &entry.values {
            if let Some(metric) = self.metrics.iter_mut().find(|m| &m.name == name) {
                metric.current_value = Some(*value);
            }
        }
        self.data_table.push(entry);
    }

    /// Whether every measurement target is met by the metric's current value.
    pub fn targets_met(&self) -> bool {
        !self.measurement_targets.is_empty()
            && self.measurement_targets.iter().all(|target| {
                self.metric(&target.metric_name)
                    .and_then(|m| m.current_value)
                    .is_some_and(|v| target.is_met(v))
            })
    }

    /// Apply an accepted suggestion.
    pub fn apply_patch(&mut self, patch: GoalPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(CoreError::validation("goal patch sets no fields"));
        }
        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(CoreError::validation("goal title must not be empty"));
            }
            self.title = title;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.target_date.is_some() {
            self.target_date = patch.target_date;
        }
        for partial in patch.metrics {
            match self.metrics.iter_mut().find(|m| m.name == partial.name) {
                Some(existing) => existing.merge(&partial),
                None => self.metrics.push(partial),
            }
        }
        for target in patch.measurement_targets {
            self.measurement_targets
                .retain(|t| t.metric_name != target.metric_name);
            self.measurement_targets.push(target);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Quality measures
    // ------------------------------------------------------------------------

    pub fn is_linked_to(&self, measure_id: &str) -> bool {
        self.linked_quality_measures.iter().any(|id| id == measure_id)
    }

    /// Link a quality measure and synthesize one task per suggestion.
    ///
    /// Suggestions already materialized on this goal are skipped, so
    /// linking twice creates each task once. Returns the new task ids.
    pub fn link_quality_measure(&mut self, measure: &QualityMeasure, now: OffsetDateTime) -> Vec<String> {
        let mut created = Vec::new();
        for (index, suggested) in measure.suggested_tasks.iter().enumerate() {
            let template_id = measure.template_id(index);
            if self
                .tasks
                .iter()
                .any(|t| t.source_template_id.as_deref() == Some(template_id.as_str()))
            {
                continue;
            }
            let task = suggested.instantiate(measure, template_id, now);
            created.push(task.id.clone());
            self.tasks.push(task);
        }

        if !self.is_linked_to(&measure.id) {
            self.linked_quality_measures.push(measure.id.clone());
        }
        debug!(
            goal_id = %self.id,
            measure_id = %measure.id,
            created = created.len(),
            "Linked quality measure"
        );
        created
    }

    /// Remove a quality-measure link and the pending tasks it created.
    ///
    /// Tasks that were started, completed or edited away from `pending`
    /// stay. Returns the removed tasks.
    pub fn unlink_quality_measure(&mut self, measure_id: &str) -> Vec<Task> {
        self.linked_quality_measures.retain(|id| id != measure_id);
        let (removed, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| {
                t.quality_measure_id.as_deref() == Some(measure_id)
                    && t.status == TaskStatus::Pending
            });
        self.tasks = kept;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityMeasureCatalog;
    use time::macros::datetime;

    #[test]
    fn test_upsert_metric_keeps_names_unique() {
        let mut goal = Goal::with_id("g1", "Lower HbA1c");
        let mut metric = GoalMetric::new("HbA1c");
        metric.target_value = Some(7.0);
        assert!(goal.upsert_metric(metric.clone()).is_none());

        metric.target_value = Some(6.5);
        let previous = goal.upsert_metric(metric).unwrap();
        assert_eq!(previous.target_value, Some(7.0));
        assert_eq!(goal.metrics.len(), 1);
        assert_eq!(goal.metric("HbA1c").unwrap().target_value, Some(6.5));
    }

    #[test]
    fn test_measurement_target_is_met() {
        let target = MeasurementTarget {
            metric_name: "Systolic".into(),
            comparator: Comparator::Lt,
            value: 130.0,
            upper_value: None,
        };
        assert!(target.is_met(120.0));
        assert!(!target.is_met(130.0));

        let range = MeasurementTarget {
            metric_name: "Glucose".into(),
            comparator: Comparator::Between,
            value: 80.0,
            upper_value: Some(130.0),
        };
        assert!(range.is_met(80.0));
        assert!(range.is_met(130.0));
        assert!(!range.is_met(131.0));
    }

    #[test]
    fn test_record_data_updates_current_value() {
        let mut goal = Goal::with_id("g1", "Weight");
        goal.upsert_metric(GoalMetric::new("Weight"));
        goal.measurement_targets.push(MeasurementTarget {
            metric_name: "Weight".into(),
            comparator: Comparator::Le,
            value: 90.0,
            upper_value: None,
        });
        assert!(!goal.targets_met());

        let mut values = IndexMap::new();
        values.insert("Weight".to_string(), 88.5);
        goal.record_data(DataTableEntry {
            recorded_at: datetime!(2024-02-01 08:00:00 UTC),
            values,
            note: None,
        });
        assert_eq!(goal.metric("Weight").unwrap().current_value, Some(88.5));
        assert!(goal.targets_met());
    }

    #[test]
    fn test_add_task_rejects_duplicate_id() {
        let mut goal = Goal::with_id("g1", "Goal");
        goal.add_task(Task::with_id("t1", "One")).unwrap();
        let err = goal.add_task(Task::with_id("t1", "Again")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[test]
    fn test_replace_and_remove_task() {
        let mut goal = Goal::with_id("g1", "Goal");
        goal.add_task(Task::with_id("t1", "One")).unwrap();
        let old = goal.replace_task(Task::with_id("t1", "Renamed")).unwrap();
        assert_eq!(old.title, "One");
        assert_eq!(goal.task("t1").unwrap().title, "Renamed");
        assert!(goal.remove_task("t1").is_some());
        assert!(goal.remove_task("t1").is_none());
    }

    #[test]
    fn test_apply_patch_merges_metrics() {
        let mut goal = Goal::with_id("g1", "BP control");
        let mut existing = GoalMetric::new("Systolic");
        existing.unit = Some("mmHg".into());
        goal.upsert_metric(existing);

        let mut partial = GoalMetric::new("Systolic");
        partial.target_value = Some(130.0);
        goal.apply_patch(GoalPatch {
            status: Some(GoalStatus::Active),
            metrics: vec![partial],
            ..Default::default()
        })
        .unwrap();

        let metric = goal.metric("Systolic").unwrap();
        assert_eq!(metric.unit.as_deref(), Some("mmHg"));
        assert_eq!(metric.target_value, Some(130.0));
        assert_eq!(goal.status, GoalStatus::Active);
    }

    #[test]
    fn test_apply_empty_patch_is_rejected() {
        let mut goal = Goal::with_id("g1", "Goal");
        assert!(goal.apply_patch(GoalPatch::default()).is_err());
    }

    #[test]
    fn test_link_quality_measure_twice_creates_tasks_once() {
        let measure = QualityMeasureCatalog::standard().lookup("CMS122").unwrap();
        let now = datetime!(2024-05-01 09:00:00 UTC);
        let mut goal = Goal::with_id("g1", "Diabetes control");

        let first = goal.link_quality_measure(measure, now);
        assert_eq!(first.len(), measure.suggested_tasks.len());
        let second = goal.link_quality_measure(measure, now);
        assert!(second.is_empty());
        assert_eq!(goal.tasks.len(), measure.suggested_tasks.len());
        assert_eq!(goal.linked_quality_measures, vec!["CMS122".to_string()]);
        assert_eq!(
            goal.tasks[0].source_template_id.as_deref(),
            Some("CMS122#0")
        );
    }

    #[test]
    fn test_unlink_keeps_started_tasks() {
        let measure = QualityMeasureCatalog::standard().lookup("CMS122").unwrap();
        let mut goal = Goal::with_id("g1", "Diabetes control");
        goal.add_task(Task::with_id("manual", "Manual task")).unwrap();
        goal.link_quality_measure(measure, datetime!(2024-05-01 09:00:00 UTC));
        goal.tasks[1].status = TaskStatus::Completed;

        let removed = goal.unlink_quality_measure("CMS122");
        assert_eq!(removed.len(), measure.suggested_tasks.len() - 1);
        assert!(!goal.is_linked_to("CMS122"));
        assert!(goal.task("manual").is_some());
        assert_eq!(goal.tasks.len(), 2);
    }
}
