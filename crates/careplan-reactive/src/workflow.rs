//! External workflow hand-off for `TriggerWorkflow` actions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Action payload merged with the firing parameters
    pub payload: serde_json::Value,
    pub flow_id: String,
    pub trigger_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

/// Starts external workflows. Fire-and-forget from the engine's view.
pub trait WorkflowLauncher: Send + Sync {
    fn launch(&self, request: WorkflowRequest) -> Result<(), String>;
}

/// Launcher that records every request in memory.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<WorkflowRequest>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched(&self) -> Vec<WorkflowRequest> {
        self.launched.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.launched.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.launched.lock().is_empty()
    }
}

impl WorkflowLauncher for RecordingLauncher {
    fn launch(&self, request: WorkflowRequest) -> Result<(), String> {
        self.launched.lock().push(request);
        Ok(())
    }
}
