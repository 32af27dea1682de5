//! Registry of reactive flows keyed by trigger id.

use careplan_core::{CarePlan, ReactiveFlow, TriggerCatalog};
use tracing::debug;

/// Where a flow was declared. Tasks created by the flow land in `goal_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FlowOwner {
    pub goal_id: Option<String>,
    pub task_id: Option<String>,
}

impl FlowOwner {
    pub fn goal(goal_id: impl Into<String>) -> Self {
        Self {
            goal_id: Some(goal_id.into()),
            task_id: None,
        }
    }

    pub fn task(goal_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            goal_id: Some(goal_id.into()),
            task_id: Some(task_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredFlow {
    pub flow: ReactiveFlow,
    pub owner: FlowOwner,
}

/// Flows in declaration order.
///
/// Identical flows may be registered more than once; each fires.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: Vec<RegisteredFlow>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flow with no owning goal or task.
    pub fn register(&mut self, flow: ReactiveFlow) {
        self.register_with(flow, FlowOwner::default());
    }

    /// Register a flow declared on a task's `reactiveFlows`.
    pub fn register_owned(&mut self, flow: ReactiveFlow, goal_id: &str, task_id: &str) {
        self.register_with(flow, FlowOwner::task(goal_id, task_id));
    }

    pub fn register_with(&mut self, flow: ReactiveFlow, owner: FlowOwner) {
        debug!(
            flow_id = %flow.id,
            trigger = %flow.trigger.id,
            goal_id = ?owner.goal_id,
            task_id = ?owner.task_id,
            "Registered reactive flow"
        );
        self.flows.push(RegisteredFlow { flow, owner });
    }

    /// Register every flow declared on the plan's tasks. Returns the count.
    pub fn register_care_plan(&mut self, plan: &CarePlan) -> usize {
        let before = self.flows.len();
        for goal in &plan.goals {
            for task in &goal.tasks {
                for flow in &task.reactive_flows {
                    self.register_owned(flow.clone(), &goal.id, &task.id);
                }
            }
        }
        self.flows.len() - before
    }

    /// Flows bound to `trigger_id`, in registration order.
    pub fn flows_for(&self, trigger_id: &str) -> Vec<&RegisteredFlow> {
        self.flows
            .iter()
            .filter(|f| f.flow.trigger.id == trigger_id)
            .collect()
    }

    /// Trigger ids referenced by registered flows but unknown to `catalog`.
    pub fn dangling_triggers(&self, catalog: &TriggerCatalog) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for registered in &self.flows {
            let id = registered.flow.trigger.id.as_str();
            if !catalog.contains(id) && !out.contains(&id) {
                out.push(id);
            }
        }
        out
    }

    pub fn remove_owned_by_task(&mut self, task_id: &str) -> usize {
        let before = self.flows.len();
        self.flows
            .retain(|f| f.owner.task_id.as_deref() != Some(task_id));
        before - self.flows.len()
    }

    pub fn remove_owned_by_goal(&mut self, goal_id: &str) -> usize {
        let before = self.flows.len();
        self.flows
            .retain(|f| f.owner.goal_id.as_deref() != Some(goal_id));
        before - self.flows.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFlow> {
        self.flows.iter()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
