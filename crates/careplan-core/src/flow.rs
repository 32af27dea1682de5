//! Reactive flows: a trigger bound to an ordered list of actions.
//!
//! Actions are a tagged union on `actionType` with a per-kind
//! `actionDetails` object. `Condition` actions own their branches, so a
//! flow is an owned tree with no back-references.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use time::OffsetDateTime;

use crate::duration::DurationSpec;
use crate::model::{ExtraValue, TaskPriority};
use crate::schedule::TaskSchedule;
use crate::time::lenient;
use crate::triggers::TriggerConfig;

// ============================================================================
// Action details
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskDetails {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Role that performs the created task, e.g. "care_manager"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_role: Option<String>,
    #[serde(
        default,
        with = "lenient::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_offset: Option<DurationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<TaskSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_config: Option<TriggerConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, ExtraValue>,
}

impl CreateTaskDetails {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            priority: None,
            category: None,
            subject_role: None,
            due_date: None,
            due_offset: None,
            template_id: None,
            schedule: None,
            trigger_config: None,
            extra: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageChannel {
    Sms,
    Email,
    Portal,
    Push,
}

impl MessageChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageChannel::Sms => "sms",
            MessageChannel::Email => "email",
            MessageChannel::Portal => "portal",
            MessageChannel::Push => "push",
        }
    }
}

impl fmt::Display for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageDetails {
    pub channel: MessageChannel,
    #[serde(default)]
    pub recipient: String,
    /// Body; may contain `{{param}}` placeholders
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWorkflowDetails {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionDetails {
    pub expression: String,
    #[serde(default)]
    pub on_true: Vec<ReactiveAction>,
    #[serde(default)]
    pub on_false: Vec<ReactiveAction>,
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ReactiveAction {
    CreateTask(CreateTaskDetails),
    SendMessage(SendMessageDetails),
    TriggerWorkflow(TriggerWorkflowDetails),
    Delay(DurationSpec),
    Condition(ConditionDetails),
    /// Action kind this build does not know; rejected when reached.
    Unrecognized {
        action_type: String,
        action_details: serde_json::Value,
    },
}

impl ReactiveAction {
    pub fn action_type(&self) -> &str {
        match self {
            ReactiveAction::CreateTask(_) => "CreateTask",
            ReactiveAction::SendMessage(_) => "SendMessage",
            ReactiveAction::TriggerWorkflow(_) => "TriggerWorkflow",
            ReactiveAction::Delay(_) => "Delay",
            ReactiveAction::Condition(_) => "Condition",
            ReactiveAction::Unrecognized { action_type, .. } => action_type,
        }
    }

    pub fn create_task(details: CreateTaskDetails) -> Self {
        ReactiveAction::CreateTask(details)
    }

    pub fn condition(
        expression: impl Into<String>,
        on_true: Vec<ReactiveAction>,
        on_false: Vec<ReactiveAction>,
    ) -> Self {
        ReactiveAction::Condition(ConditionDetails {
            expression: expression.into(),
            on_true,
            on_false,
        })
    }

    /// Deepest `Condition` nesting below and including this action.
    pub fn condition_depth(&self) -> usize {
        let mut max = 0;
        let mut stack: Vec<(&ReactiveAction, usize)> = vec![(self, 0)];
        while let Some((action, depth)) = stack.pop() {
            if let ReactiveAction::Condition(details) = action {
                let depth = depth + 1;
                max = max.max(depth);
                stack.extend(
                    details
                        .on_true
                        .iter()
                        .chain(details.on_false.iter())
                        .map(|a| (a, depth)),
                );
            }
        }
        max
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    action_type: String,
    #[serde(default)]
    action_details: serde_json::Value,
}

impl Serialize for ReactiveAction {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let details = match self {
            ReactiveAction::CreateTask(d) => serde_json::to_value(d),
            ReactiveAction::SendMessage(d) => serde_json::to_value(d),
            ReactiveAction::TriggerWorkflow(d) => serde_json::to_value(d),
            ReactiveAction::Delay(d) => serde_json::to_value(d),
            ReactiveAction::Condition(d) => serde_json::to_value(d),
            ReactiveAction::Unrecognized { action_details, .. } => Ok(action_details.clone()),
        }
        .map_err(serde::ser::Error::custom)?;

        RawAction {
            action_type: self.action_type().to_string(),
            action_details: details,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReactiveAction {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawAction::deserialize(deserializer)?;
        let details = raw.action_details;
        let action = match raw.action_type.as_str() {
            "CreateTask" => {
                ReactiveAction::CreateTask(serde_json::from_value(details).map_err(serde::de::Error::custom)?)
            }
            "SendMessage" => {
                ReactiveAction::SendMessage(serde_json::from_value(details).map_err(serde::de::Error::custom)?)
            }
            "TriggerWorkflow" => ReactiveAction::TriggerWorkflow(
                serde_json::from_value(details).map_err(serde::de::Error::custom)?,
            ),
            "Delay" => ReactiveAction::Delay(serde_json::from_value(details).map_err(serde::de::Error::custom)?),
            "Condition" => {
                ReactiveAction::Condition(serde_json::from_value(details).map_err(serde::de::Error::custom)?)
            }
            _ => ReactiveAction::Unrecognized {
                action_type: raw.action_type,
                action_details: details,
            },
        };
        Ok(action)
    }
}

// ============================================================================
// Flows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTrigger {
    pub id: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactiveFlow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub trigger: FlowTrigger,
    #[serde(default)]
    pub actions: Vec<ReactiveAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_name: Option<String>,
}

impl ReactiveFlow {
    pub fn new(id: impl Into<String>, trigger_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            trigger: FlowTrigger {
                id: trigger_id.into(),
                params: IndexMap::new(),
            },
            actions: Vec::new(),
            source_template_id: None,
            source_template_name: None,
        }
    }

    pub fn with_action(mut self, action: ReactiveAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_source_template(mut self, template_id: impl Into<String>) -> Self {
        self.source_template_id = Some(template_id.into());
        self
    }

    /// Deepest `Condition` nesting anywhere in the flow.
    pub fn condition_depth(&self) -> usize {
        self.actions
            .iter()
            .map(ReactiveAction::condition_depth)
            .max()
            .unwrap_or(0)
    }
}
