use async_trait::async_trait;
use careplan_core::{Goal, GoalMetric, GoalPatch, GoalSuggestion};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Suggested change to a goal with the reason for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetUpdate {
    pub suggestion: GoalPatch,
    pub rationale: String,
}

/// Source of care-plan suggestions.
///
/// Every call is a single round trip with no side effects on the plan;
/// callers decide whether to accept the result.
#[async_trait]
pub trait SuggestionService: Send + Sync {
    /// Metrics worth tracking for the given diagnoses
    async fn suggest_metrics(&self, diagnoses: &[String]) -> Result<Vec<GoalMetric>>;

    /// Goals grouped by the diagnosis they address
    async fn suggest_goals(&self, diagnoses: &[String]) -> Result<Vec<GoalSuggestion>>;

    /// Revised targets for an existing goal
    async fn suggest_target_update(&self, goal: &Goal) -> Result<TargetUpdate>;

    /// Targets for goal metrics that have none yet
    async fn suggest_task_targets(&self, goal: &Goal) -> Result<Vec<GoalMetric>>;
}
