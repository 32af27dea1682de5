//! Quality-measure catalog (CMS, HEDIS, MIPS) and the tasks each measure
//! suggests when linked to a goal.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use time::OffsetDateTime;

use crate::duration::TimeUnit;
use crate::model::{Task, TaskPriority, TaskStatus};
use crate::schedule::TaskSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityProgram {
    #[serde(rename = "CMS")]
    Cms,
    #[serde(rename = "HEDIS")]
    Hedis,
    #[serde(rename = "MIPS")]
    Mips,
    #[serde(rename = "custom")]
    Custom,
}

impl QualityProgram {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityProgram::Cms => "CMS",
            QualityProgram::Hedis => "HEDIS",
            QualityProgram::Mips => "MIPS",
            QualityProgram::Custom => "custom",
        }
    }
}

/// Recurrence of a suggested task, anchored when the task is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedRecurrence {
    pub frequency: u32,
    pub period: u32,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTask {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<SuggestedRecurrence>,
}

impl SuggestedTask {
    fn new(title: &str, priority: TaskPriority, category: &str) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            priority,
            category: Some(category.to_string()),
            recurrence: None,
        }
    }

    fn every(mut self, frequency: u32, period: u32, unit: TimeUnit) -> Self {
        self.recurrence = Some(SuggestedRecurrence {
            frequency,
            period,
            unit,
        });
        self
    }

    /// Build the pending task this suggestion stands for.
    pub fn instantiate(&self, measure: &QualityMeasure, template_id: String, now: OffsetDateTime) -> Task {
        let mut task = Task::new(self.title.clone());
        task.description = self.description.clone();
        task.priority = self.priority;
        task.category = self.category.clone();
        task.status = TaskStatus::Pending;
        task.schedule = self
            .recurrence
            .map(|r| TaskSchedule::new(r.frequency, r.period, r.unit, now));
        task.source_template_id = Some(template_id);
        task.source_template_name = Some(measure.title.clone());
        task.quality_measure_id = Some(measure.id.clone());
        task
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMeasure {
    pub id: String,
    pub title: String,
    pub program: QualityProgram,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub suggested_tasks: Vec<SuggestedTask>,
}

impl QualityMeasure {
    /// Template identity of the suggested task at `index`.
    pub fn template_id(&self, index: usize) -> String {
        format!("{}#{}", self.id, index)
    }
}

static STANDARD_MEASURES: LazyLock<QualityMeasureCatalog> = LazyLock::new(|| {
    use TaskPriority::*;
    QualityMeasureCatalog::new(vec![
        QualityMeasure {
            id: "CMS122".into(),
            title: "Diabetes: Hemoglobin A1c Poor Control (>9%)".into(),
            program: QualityProgram::Cms,
            description: Some("Patients 18-75 with diabetes whose most recent HbA1c is above 9%".into()),
            suggested_tasks: vec![
                SuggestedTask::new("Order HbA1c lab test", High, "lab").every(1, 3, TimeUnit::Months),
                SuggestedTask::new("Review diabetes medication adherence", Medium, "medication"),
                SuggestedTask::new("Schedule diabetes education session", Medium, "education"),
            ],
        },
        QualityMeasure {
            id: "CMS165".into(),
            title: "Controlling High Blood Pressure".into(),
            program: QualityProgram::Cms,
            description: Some("Patients 18-85 with hypertension whose blood pressure is below 140/90".into()),
            suggested_tasks: vec![
                SuggestedTask::new("Record blood pressure reading", High, "monitoring").every(1, 1, TimeUnit::Weeks),
                SuggestedTask::new("Review antihypertensive regimen", Medium, "medication"),
            ],
        },
        QualityMeasure {
            id: "CMS134".into(),
            title: "Diabetes: Medical Attention for Nephropathy".into(),
            program: QualityProgram::Cms,
            description: None,
            suggested_tasks: vec![
                SuggestedTask::new("Order urine albumin test", Medium, "lab").every(1, 12, TimeUnit::Months),
            ],
        },
        QualityMeasure {
            id: "CMS2".into(),
            title: "Preventive Care and Screening: Screening for Depression and Follow-Up Plan".into(),
            program: QualityProgram::Cms,
            description: None,
            suggested_tasks: vec![
                SuggestedTask::new("Administer PHQ-9 screening", Medium, "assessment").every(1, 12, TimeUnit::Months),
                SuggestedTask::new("Document follow-up plan for positive screen", High, "care-coordination"),
            ],
        },
        QualityMeasure {
            id: "HEDIS-CBP".into(),
            title: "Controlling Blood Pressure".into(),
            program: QualityProgram::Hedis,
            description: None,
            suggested_tasks: vec![
                SuggestedTask::new("Confirm most recent BP reading is documented", Medium, "monitoring"),
            ],
        },
        QualityMeasure {
            id: "HEDIS-PCR".into(),
            title: "Plan All-Cause Readmissions".into(),
            program: QualityProgram::Hedis,
            description: None,
            suggested_tasks: vec![
                SuggestedTask::new("Post-discharge follow-up call within 48 hours", Urgent, "care-coordination"),
                SuggestedTask::new("Medication reconciliation after discharge", High, "medication"),
            ],
        },
        QualityMeasure {
            id: "MIPS-047".into(),
            title: "Advance Care Plan".into(),
            program: QualityProgram::Mips,
            description: None,
            suggested_tasks: vec![
                SuggestedTask::new("Discuss advance care planning", Low, "counseling"),
            ],
        },
    ])
});

#[derive(Debug, Clone, Default)]
pub struct QualityMeasureCatalog {
    measures: Vec<QualityMeasure>,
}

impl QualityMeasureCatalog {
    pub fn new(measures: Vec<QualityMeasure>) -> Self {
        Self { measures }
    }

    /// Built-in measure table.
    pub fn standard() -> &'static QualityMeasureCatalog {
        &STANDARD_MEASURES
    }

    pub fn lookup(&self, id: &str) -> Option<&QualityMeasure> {
        self.measures.iter().find(|m| m.id == id)
    }

    /// Case-insensitive match on id, title or description.
    pub fn search(&self, text: &str) -> Vec<&QualityMeasure> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return self.measures.iter().collect();
        }
        self.measures
            .iter()
            .filter(|m| {
                m.id.to_lowercase().contains(&needle)
                    || m.title.to_lowercase().contains(&needle)
                    || m.description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .collect()
    }

    pub fn by_program(&self, program: QualityProgram) -> impl Iterator<Item = &QualityMeasure> {
        self.measures.iter().filter(move |m| m.program == program)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QualityMeasure> {
        self.measures.iter()
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_lookup_and_search() {
        let catalog = QualityMeasureCatalog::standard();
        assert!(catalog.lookup("CMS165").is_some());
        assert!(catalog.lookup("CMS999").is_none());

        let hits = catalog.search("blood pressure");
        let ids: Vec<&str> = hits.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["CMS165", "HEDIS-CBP"]);
        assert_eq!(catalog.search("").len(), catalog.len());
    }

    #[test]
    fn test_by_program() {
        let catalog = QualityMeasureCatalog::standard();
        assert!(catalog.by_program(QualityProgram::Hedis).all(|m| m.id.starts_with("HEDIS")));
        assert_eq!(catalog.by_program(QualityProgram::Mips).count(), 1);
    }

    #[test]
    fn test_instantiate_suggested_task() {
        let measure = QualityMeasureCatalog::standard().lookup("CMS122").unwrap();
        let now = datetime!(2024-05-01 09:00:00 UTC);
        let task = measure.suggested_tasks[0].instantiate(measure, measure.template_id(0), now);

        assert_eq!(task.title, "Order HbA1c lab test");
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.quality_measure_id.as_deref(), Some("CMS122"));
        assert_eq!(task.source_template_id.as_deref(), Some("CMS122#0"));
        let schedule = task.schedule.unwrap();
        assert_eq!(schedule.unit, TimeUnit::Months);
        assert_eq!(schedule.period, 3);
        assert_eq!(schedule.start_date, now);
    }

    #[test]
    fn test_program_serialization() {
        assert_eq!(serde_json::to_string(&QualityProgram::Hedis).unwrap(), "\"HEDIS\"");
        assert_eq!(QualityProgram::Custom.as_str(), "custom");
    }
}
