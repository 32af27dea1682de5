//! Trigger catalog and per-task trigger timing.
//!
//! The catalog is a process-wide constant table of the host events that can
//! activate tasks and reactive flows. Lookups for ids that are not in the
//! table return `None`; stored plans may still reference retired trigger ids
//! and callers are expected to filter those out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use time::{OffsetDateTime, Time};

use crate::duration::DurationSpec;
use crate::error::{CoreError, Result};
use crate::time::TimeOfDay;

// ============================================================================
// Trigger events
// ============================================================================

/// Kinds of host events known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTriggerEvent {
    ObservationRecorded,
    ObservationOutOfRange,
    AppointmentScheduled,
    AppointmentMissed,
    AppointmentCompleted,
    MedicationRefillDue,
    MedicationMissed,
    LabResultReceived,
    HospitalAdmission,
    HospitalDischarge,
    CarePlanUpdated,
    TaskCompleted,
    TaskOverdue,
    PatientMessageReceived,
    AssessmentDue,
}

impl TaskTriggerEvent {
    pub const ALL: [TaskTriggerEvent; 15] = [
        TaskTriggerEvent::ObservationRecorded,
        TaskTriggerEvent::ObservationOutOfRange,
        TaskTriggerEvent::AppointmentScheduled,
        TaskTriggerEvent::AppointmentMissed,
        TaskTriggerEvent::AppointmentCompleted,
        TaskTriggerEvent::MedicationRefillDue,
        TaskTriggerEvent::MedicationMissed,
        TaskTriggerEvent::LabResultReceived,
        TaskTriggerEvent::HospitalAdmission,
        TaskTriggerEvent::HospitalDischarge,
        TaskTriggerEvent::CarePlanUpdated,
        TaskTriggerEvent::TaskCompleted,
        TaskTriggerEvent::TaskOverdue,
        TaskTriggerEvent::PatientMessageReceived,
        TaskTriggerEvent::AssessmentDue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTriggerEvent::ObservationRecorded => "observation_recorded",
            TaskTriggerEvent::ObservationOutOfRange => "observation_out_of_range",
            TaskTriggerEvent::AppointmentScheduled => "appointment_scheduled",
            TaskTriggerEvent::AppointmentMissed => "appointment_missed",
            TaskTriggerEvent::AppointmentCompleted => "appointment_completed",
            TaskTriggerEvent::MedicationRefillDue => "medication_refill_due",
            TaskTriggerEvent::MedicationMissed => "medication_missed",
            TaskTriggerEvent::LabResultReceived => "lab_result_received",
            TaskTriggerEvent::HospitalAdmission => "hospital_admission",
            TaskTriggerEvent::HospitalDischarge => "hospital_discharge",
            TaskTriggerEvent::CarePlanUpdated => "care_plan_updated",
            TaskTriggerEvent::TaskCompleted => "task_completed",
            TaskTriggerEvent::TaskOverdue => "task_overdue",
            TaskTriggerEvent::PatientMessageReceived => "patient_message_received",
            TaskTriggerEvent::AssessmentDue => "assessment_due",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.as_str() == s)
    }
}

impl fmt::Display for TaskTriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Human-readable predicate describing when the event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDetails {
    pub condition: String,
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: TaskTriggerEvent,
    pub label: String,
    pub details: TriggerDetails,
}

impl TriggerEvent {
    fn new(id: TaskTriggerEvent, label: &str, condition: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            details: TriggerDetails {
                condition: condition.to_string(),
            },
        }
    }
}

static STANDARD_CATALOG: LazyLock<TriggerCatalog> = LazyLock::new(|| {
    use TaskTriggerEvent::*;
    TriggerCatalog::new(vec![
        TriggerEvent::new(
            ObservationRecorded,
            "Observation recorded",
            "A new observation is recorded for the patient",
        ),
        TriggerEvent::new(
            ObservationOutOfRange,
            "Observation out of range",
            "A recorded observation falls outside the goal's target range",
        ),
        TriggerEvent::new(
            AppointmentScheduled,
            "Appointment scheduled",
            "An appointment is booked for the patient",
        ),
        TriggerEvent::new(
            AppointmentMissed,
            "Appointment missed",
            "The patient did not attend a scheduled appointment",
        ),
        TriggerEvent::new(
            AppointmentCompleted,
            "Appointment completed",
            "A scheduled appointment was attended",
        ),
        TriggerEvent::new(
            MedicationRefillDue,
            "Medication refill due",
            "A medication supply is expected to run out within the refill window",
        ),
        TriggerEvent::new(
            MedicationMissed,
            "Medication dose missed",
            "A scheduled medication dose was not confirmed",
        ),
        TriggerEvent::new(
            LabResultReceived,
            "Lab result received",
            "A laboratory result is filed to the patient's record",
        ),
        TriggerEvent::new(
            HospitalAdmission,
            "Hospital admission",
            "The patient is admitted as an inpatient",
        ),
        TriggerEvent::new(
            HospitalDischarge,
            "Hospital discharge",
            "The patient is discharged from an inpatient stay",
        ),
        TriggerEvent::new(
            CarePlanUpdated,
            "Care plan updated",
            "Goals or tasks of the care plan were changed",
        ),
        TriggerEvent::new(
            TaskCompleted,
            "Task completed",
            "A task in the care plan was marked completed",
        ),
        TriggerEvent::new(
            TaskOverdue,
            "Task overdue",
            "A task passed its due date without being completed",
        ),
        TriggerEvent::new(
            PatientMessageReceived,
            "Patient message received",
            "The patient sent a message through a connected channel",
        ),
        TriggerEvent::new(
            AssessmentDue,
            "Assessment due",
            "A periodic assessment reached its due date",
        ),
    ])
});

/// Read-only table of trigger events, in declaration order.
#[derive(Debug, Clone)]
pub struct TriggerCatalog {
    events: Vec<TriggerEvent>,
}

impl TriggerCatalog {
    pub fn new(events: Vec<TriggerEvent>) -> Self {
        Self { events }
    }

    /// The process-wide catalog.
    pub fn standard() -> &'static TriggerCatalog {
        &STANDARD_CATALOG
    }

    pub fn lookup(&self, id: &str) -> Option<&TriggerEvent> {
        self.events.iter().find(|e| e.id.as_str() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TriggerEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ============================================================================
// Trigger timing
// ============================================================================

/// Window of the day in which a triggered task may become active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl StartWindow {
    /// Move `at` forward to the next instant inside the window.
    ///
    /// A window whose end precedes its start spans midnight.
    pub fn clamp(&self, at: OffsetDateTime) -> OffsetDateTime {
        let t = at.time();
        let (start, end) = (self.start.time(), self.end.time());

        if start <= end {
            if t < start {
                at.replace_time(start)
            } else if t > end {
                (at + time::Duration::days(1)).replace_time(start)
            } else {
                at
            }
        } else if t >= start || t <= end {
            at
        } else {
            at.replace_time(start)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueDatePolicyType {
    None,
    DaysAfterActivation,
    HoursAfterActivation,
    EndOfActivationDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDatePolicy {
    #[serde(rename = "type")]
    pub policy_type: DueDatePolicyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
}

impl Default for DueDatePolicy {
    fn default() -> Self {
        Self {
            policy_type: DueDatePolicyType::None,
            value: None,
        }
    }
}

impl DueDatePolicy {
    pub fn days_after(days: u32) -> Self {
        Self {
            policy_type: DueDatePolicyType::DaysAfterActivation,
            value: Some(days),
        }
    }

    /// Due date for a task activated at `activation`.
    pub fn due_date(&self, activation: OffsetDateTime) -> Result<Option<OffsetDateTime>> {
        let amount = |unit: &str| {
            self.value.map(i64::from).ok_or_else(|| {
                CoreError::validation(format!("dueDatePolicy of {unit} requires a value"))
            })
        };

        let due = match self.policy_type {
            DueDatePolicyType::None => None,
            DueDatePolicyType::DaysAfterActivation => {
                Some(activation + time::Duration::days(amount("days")?))
            }
            DueDatePolicyType::HoursAfterActivation => {
                Some(activation + time::Duration::hours(amount("hours")?))
            }
            DueDatePolicyType::EndOfActivationDay => {
                let end_of_day = Time::from_hms(23, 59, 0)
                    .map_err(|e| CoreError::invalid_date_time(e.to_string()))?;
                Some(activation.replace_time(end_of_day))
            }
        };
        Ok(due)
    }
}

/// Timing and deduplication of task creation in response to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub offset: DurationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_start_window: Option<StartWindow>,
    #[serde(default)]
    pub due_date_policy: DueDatePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduplication_window: Option<DurationSpec>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            offset: DurationSpec::minutes(0),
            earliest_start_window: None,
            due_date_policy: DueDatePolicy::default(),
            deduplication_window: None,
        }
    }
}

impl TriggerConfig {
    /// When a task created for a trigger fired at `fired_at` becomes active.
    pub fn activation_time(&self, fired_at: OffsetDateTime) -> Result<OffsetDateTime> {
        let shifted = self.offset.after(fired_at)?;
        Ok(match &self.earliest_start_window {
            Some(window) => window.clamp(shifted),
            None => shifted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_catalog_lookup() {
        let catalog = TriggerCatalog::standard();
        let event = catalog.lookup("observation_out_of_range").unwrap();
        assert_eq!(event.id, TaskTriggerEvent::ObservationOutOfRange);
        assert_eq!(event.label, "Observation out of range");
        assert!(!event.details.condition.is_empty());
    }

    #[test]
    fn test_catalog_unknown_id_is_none() {
        let catalog = TriggerCatalog::standard();
        assert!(catalog.lookup("retired_trigger").is_none());
        assert!(!catalog.contains(""));
    }

    #[test]
    fn test_catalog_covers_every_kind() {
        let catalog = TriggerCatalog::standard();
        assert_eq!(catalog.len(), TaskTriggerEvent::ALL.len());
        for kind in TaskTriggerEvent::ALL {
            assert!(catalog.contains(kind.as_str()), "missing {kind}");
            assert_eq!(TaskTriggerEvent::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_trigger_event_serialization() {
        let json = serde_json::to_string(&TaskTriggerEvent::AppointmentMissed).unwrap();
        assert_eq!(json, r#""appointment_missed""#);
    }

    #[test]
    fn test_start_window_clamp() {
        let window = StartWindow {
            start: "08:00".parse().unwrap(),
            end: "18:00".parse().unwrap(),
        };
        assert_eq!(
            window.clamp(datetime!(2024-06-01 06:30:00 UTC)),
            datetime!(2024-06-01 08:00:00 UTC)
        );
        assert_eq!(
            window.clamp(datetime!(2024-06-01 12:00:00 UTC)),
            datetime!(2024-06-01 12:00:00 UTC)
        );
        assert_eq!(
            window.clamp(datetime!(2024-06-01 19:00:00 UTC)),
            datetime!(2024-06-02 08:00:00 UTC)
        );
    }

    #[test]
    fn test_overnight_start_window() {
        let window = StartWindow {
            start: "22:00".parse().unwrap(),
            end: "06:00".parse().unwrap(),
        };
        assert_eq!(
            window.clamp(datetime!(2024-06-01 23:00:00 UTC)),
            datetime!(2024-06-01 23:00:00 UTC)
        );
        assert_eq!(
            window.clamp(datetime!(2024-06-01 03:00:00 UTC)),
            datetime!(2024-06-01 03:00:00 UTC)
        );
        assert_eq!(
            window.clamp(datetime!(2024-06-01 12:00:00 UTC)),
            datetime!(2024-06-01 22:00:00 UTC)
        );
    }

    #[test]
    fn test_due_date_policies() {
        let activation = datetime!(2024-06-01 10:00:00 UTC);
        assert_eq!(DueDatePolicy::default().due_date(activation).unwrap(), None);
        assert_eq!(
            DueDatePolicy::days_after(2).due_date(activation).unwrap(),
            Some(datetime!(2024-06-03 10:00:00 UTC))
        );
        let end_of_day = DueDatePolicy {
            policy_type: DueDatePolicyType::EndOfActivationDay,
            value: None,
        };
        assert_eq!(
            end_of_day.due_date(activation).unwrap(),
            Some(datetime!(2024-06-01 23:59:00 UTC))
        );
        let missing_value = DueDatePolicy {
            policy_type: DueDatePolicyType::HoursAfterActivation,
            value: None,
        };
        assert!(missing_value.due_date(activation).is_err());
    }

    #[test]
    fn test_activation_time_applies_offset_then_window() {
        let config = TriggerConfig {
            offset: DurationSpec::hours(2),
            earliest_start_window: Some(StartWindow {
                start: "09:00".parse().unwrap(),
                end: "17:00".parse().unwrap(),
            }),
            ..Default::default()
        };
        assert_eq!(
            config
                .activation_time(datetime!(2024-06-01 16:30:00 UTC))
                .unwrap(),
            datetime!(2024-06-02 09:00:00 UTC)
        );
    }

    #[test]
    fn test_trigger_config_deserialization() {
        let json = serde_json::json!({
            "offset": {"value": 1, "unit": "hours"},
            "dueDatePolicy": {"type": "days_after_activation", "value": 3},
            "deduplicationWindow": {"value": 24, "unit": "hours"}
        });
        let config: TriggerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.offset, DurationSpec::hours(1));
        assert_eq!(config.due_date_policy, DueDatePolicy::days_after(3));
        assert_eq!(config.deduplication_window, Some(DurationSpec::hours(24)));
        assert!(config.earliest_start_window.is_none());
    }
}
