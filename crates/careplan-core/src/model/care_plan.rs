use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::id::generate_id;

use super::goal::{Goal, GoalMetric};
use super::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barrier {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationItem {
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
}

/// Goals suggested for one diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSuggestion {
    pub condition: String,
    pub goals: Vec<SuggestedGoal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedGoal {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metrics: Vec<GoalMetric>,
}

/// Root aggregate: one patient's care plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlan {
    pub id: String,
    pub patient_id: String,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub barriers: Vec<Barrier>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub education: Vec<EducationItem>,
}

impl CarePlan {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            patient_id: patient_id.into(),
            goals: Vec::new(),
            barriers: Vec::new(),
            instructions: Vec::new(),
            education: Vec::new(),
        }
    }

    pub fn add_goal(&mut self, goal: Goal) -> Result<()> {
        if self.goal(&goal.id).is_some() {
            return Err(CoreError::conflict("Goal", goal.id));
        }
        self.goals.push(goal);
        Ok(())
    }

    pub fn goal(&self, id: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn goal_mut(&mut self, id: &str) -> Option<&mut Goal> {
        self.goals.iter_mut().find(|g| g.id == id)
    }

    /// Remove a goal with all of its tasks.
    pub fn remove_goal(&mut self, id: &str) -> Option<Goal> {
        let index = self.goals.iter().position(|g| g.id == id)?;
        Some(self.goals.remove(index))
    }

    pub fn remove_task(&mut self, goal_id: &str, task_id: &str) -> Result<Task> {
        let goal = self
            .goal_mut(goal_id)
            .ok_or_else(|| CoreError::not_found("Goal", goal_id))?;
        goal.remove_task(task_id)
            .ok_or_else(|| CoreError::not_found("Task", task_id))
    }

    /// Find a task anywhere in the plan, with the id of its goal.
    pub fn find_task(&self, task_id: &str) -> Option<(&Goal, &Task)> {
        self.goals
            .iter()
            .find_map(|g| g.task(task_id).map(|t| (g, t)))
    }

    pub fn add_barrier(&mut self, description: impl Into<String>, mitigation: Option<String>) -> &Barrier {
        self.barriers.push(Barrier {
            id: generate_id(),
            description: description.into(),
            mitigation,
        });
        &self.barriers[self.barriers.len() - 1]
    }

    pub fn add_instruction(&mut self, text: impl Into<String>) -> &Instruction {
        self.instructions.push(Instruction {
            id: generate_id(),
            text: text.into(),
        });
        &self.instructions[self.instructions.len() - 1]
    }

    pub fn add_education(&mut self, topic: impl Into<String>, resource_url: Option<String>) -> &EducationItem {
        self.education.push(EducationItem {
            id: generate_id(),
            topic: topic.into(),
            resource_url,
        });
        &self.education[self.education.len() - 1]
    }

    /// Turn accepted goal suggestions into proposed goals.
    ///
    /// A suggestion whose title matches an existing goal for the same
    /// condition only merges its metrics. Returns the ids of new goals.
    pub fn accept_goal_suggestions(&mut self, suggestions: Vec<GoalSuggestion>) -> Vec<String> {
        let mut created = Vec::new();
        for suggestion in suggestions {
            for suggested in suggestion.goals {
                let existing = self.goals.iter_mut().find(|g| {
                    g.title.eq_ignore_ascii_case(&suggested.title)
                        && g.condition.as_deref() == Some(suggestion.condition.as_str())
                });
                match existing {
                    Some(goal) => {
                        for metric in suggested.metrics {
                            goal.upsert_metric(metric);
                        }
                    }
                    None => {
                        let mut goal = Goal::new(suggested.title);
                        goal.description = suggested.description;
                        goal.condition = Some(suggestion.condition.clone());
                        for metric in suggested.metrics {
                            goal.upsert_metric(metric);
                        }
                        created.push(goal.id.clone());
                        self.goals.push(goal);
                    }
                }
            }
        }
        debug!(plan_id = %self.id, created = created.len(), "Accepted goal suggestions");
        created
    }
}
