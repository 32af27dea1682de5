//! Action evaluator.
//!
//! Runs a flow's actions strictly in order over an explicit stack of
//! frames, one per action sequence being walked (the flow's top-level list
//! or a `Condition` branch). A `Delay` saves the stack as a
//! [`Continuation`] and stops; resuming rebuilds the stack from the saved
//! cursors. The first failing action halts the flow. Effects of earlier
//! actions stand.

use careplan_core::{
    CarePlan, ConditionDetails, CreateTaskDetails, DurationSpec, Goal, MessageChannel,
    ReactiveAction, ReactiveFlow, SendMessageDetails, Task, TriggerWorkflowDetails,
};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::dedup::{DedupKey, DedupLedger};
use crate::delay::{Continuation, DelayQueue};
use crate::error::{ErrorKind, EvaluationError, Result};
use crate::expression::parse_expression;
use crate::notify::{MessageRenderer, NotificationDispatcher, OutboundMessage};
use crate::registry::{FlowOwner, RegisteredFlow};
use crate::workflow::{WorkflowLauncher, WorkflowRequest};

/// Default limit on nested `Condition` actions.
pub const DEFAULT_MAX_CONDITION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub max_condition_depth: usize,
    /// Applied to `CreateTask` when neither the action nor its task sets one
    pub default_dedup_window: Option<DurationSpec>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_condition_depth: DEFAULT_MAX_CONDITION_DEPTH,
            default_dedup_window: None,
        }
    }
}

// ============================================================================
// Firing context
// ============================================================================

/// One occurrence of a trigger event.
#[derive(Debug, Clone, PartialEq)]
pub struct FiringContext {
    pub trigger_id: String,
    pub fired_at: OffsetDateTime,
    pub params: IndexMap<String, Value>,
    /// Identity of the event instance, e.g. an observation id
    pub instance_key: Option<String>,
    pub goal_id: Option<String>,
    pub task_id: Option<String>,
}

impl FiringContext {
    pub fn new(trigger_id: impl Into<String>, fired_at: OffsetDateTime) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            fired_at,
            params: IndexMap::new(),
            instance_key: None,
            goal_id: None,
            task_id: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_instance_key(mut self, key: impl Into<String>) -> Self {
        self.instance_key = Some(key.into());
        self
    }

    pub fn for_goal(mut self, goal_id: impl Into<String>) -> Self {
        self.goal_id = Some(goal_id.into());
        self
    }

    pub fn for_task(mut self, goal_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        self.goal_id = Some(goal_id.into());
        self.task_id = Some(task_id.into());
        self
    }

    /// Key used to recognise repeated firings of the same event.
    pub fn dedup_instance(&self) -> &str {
        self.instance_key.as_deref().unwrap_or(&self.trigger_id)
    }

    /// Flow parameters overlaid with this firing's parameters.
    fn merged_with(&self, defaults: &IndexMap<String, Value>) -> Self {
        let mut merged = self.clone();
        let mut params = defaults.clone();
        for (key, value) in &self.params {
            params.insert(key.clone(), value.clone());
        }
        merged.params = params;
        merged
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ActionEffect {
    TaskCreated { goal_id: String, task_id: String },
    /// A task for the same template and event already exists in the window
    TaskDeduplicated { goal_id: String, task_id: String },
    MessageDispatched { channel: MessageChannel, recipient: String },
    WorkflowLaunched { workflow_id: String },
    Suspended { continuation_id: u64, resume_at: OffsetDateTime },
    Branched { taken: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// Position in the flow, e.g. `2.t.0` for the first `onTrue` action
    /// of the third top-level action
    pub path: String,
    pub action_type: String,
    pub effect: ActionEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Completed,
    Suspended { continuation_id: u64 },
    Failed,
}

/// Result of evaluating (or resuming) one flow.
#[derive(Debug)]
pub struct FlowReport {
    pub flow_id: String,
    pub trigger_id: String,
    pub status: FlowStatus,
    pub outcomes: Vec<ActionOutcome>,
    pub error: Option<EvaluationError>,
}

impl FlowReport {
    fn new(flow_id: &str, trigger_id: &str) -> Self {
        Self {
            flow_id: flow_id.to_string(),
            trigger_id: trigger_id.to_string(),
            status: FlowStatus::Completed,
            outcomes: Vec::new(),
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == FlowStatus::Completed
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.status, FlowStatus::Suspended { .. })
    }

    pub fn is_failed(&self) -> bool {
        self.status == FlowStatus::Failed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(EvaluationError::kind)
    }

    /// Ids of tasks created by this run, in creation order.
    pub fn created_tasks(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.effect {
                ActionEffect::TaskCreated { task_id, .. } => Some(task_id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn fail(&mut self, error: EvaluationError) {
        self.status = FlowStatus::Failed;
        self.error = Some(error);
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Step from an action list into one branch of its `Condition` at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BranchStep {
    index: usize,
    on_true: bool,
}

/// Position within one action sequence.
#[derive(Debug)]
struct Frame<'a> {
    actions: &'a [ReactiveAction],
    next: usize,
    depth: usize,
    /// Route from the flow's top-level list to `actions`
    route: Vec<BranchStep>,
}

impl<'a> Frame<'a> {
    fn root(actions: &'a [ReactiveAction]) -> Self {
        Self {
            actions,
            next: 0,
            depth: 0,
            route: Vec::new(),
        }
    }

    fn save(&self) -> SavedFrame {
        SavedFrame {
            route: self.route.clone(),
            next: self.next,
            depth: self.depth,
        }
    }
}

/// A frame detached from the flow it walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SavedFrame {
    route: Vec<BranchStep>,
    next: usize,
    depth: usize,
}

impl SavedFrame {
    fn restore<'a>(&self, flow: &'a ReactiveFlow) -> Result<Frame<'a>> {
        let mut actions: &'a [ReactiveAction] = flow.actions.as_slice();
        for step in &self.route {
            actions = match actions.get(step.index) {
                Some(ReactiveAction::Condition(details)) if step.on_true => details.on_true.as_slice(),
                Some(ReactiveAction::Condition(details)) => details.on_false.as_slice(),
                _ => {
                    return Err(EvaluationError::configuration(format!(
                        "continuation for flow {} no longer matches its actions",
                        flow.id
                    )));
                }
            };
        }
        Ok(Frame {
            actions,
            next: self.next,
            depth: self.depth,
            route: self.route.clone(),
        })
    }
}

fn action_path(route: &[BranchStep], index: usize) -> String {
    let mut path = String::new();
    for step in route {
        path.push_str(&step.index.to_string());
        path.push_str(if step.on_true { ".t." } else { ".f." });
    }
    path.push_str(&index.to_string());
    path
}

// ============================================================================
// Evaluator
// ============================================================================

pub struct ActionEvaluator {
    config: EvaluatorConfig,
    renderer: MessageRenderer,
    notifier: Arc<dyn NotificationDispatcher>,
    launcher: Arc<dyn WorkflowLauncher>,
    dedup: DedupLedger,
    delays: DelayQueue,
}

impl ActionEvaluator {
    pub fn new(
        config: EvaluatorConfig,
        notifier: Arc<dyn NotificationDispatcher>,
        launcher: Arc<dyn WorkflowLauncher>,
    ) -> Self {
        Self {
            config,
            renderer: MessageRenderer::new(),
            notifier,
            launcher,
            dedup: DedupLedger::new(),
            delays: DelayQueue::new(),
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn delays(&self) -> &DelayQueue {
        &self.delays
    }

    pub fn delays_mut(&mut self) -> &mut DelayQueue {
        &mut self.delays
    }

    pub fn dedup_mut(&mut self) -> &mut DedupLedger {
        &mut self.dedup
    }

    /// Evaluate a registered flow for one firing.
    pub fn evaluate(
        &mut self,
        plan: &mut CarePlan,
        registered: &RegisteredFlow,
        ctx: &FiringContext,
    ) -> FlowReport {
        let flow = &registered.flow;
        let ctx = ctx.merged_with(&flow.trigger.params);
        let mut report = FlowReport::new(&flow.id, &ctx.trigger_id);

        debug!(
            flow_id = %flow.id,
            trigger = %ctx.trigger_id,
            actions = flow.actions.len(),
            "Evaluating reactive flow"
        );

        let frames = vec![Frame::root(&flow.actions)];
        self.run(plan, flow, &registered.owner, &ctx, ctx.fired_at, frames, &mut report);
        report
    }

    /// Continue a flow parked by a `Delay`.
    pub fn resume(&mut self, plan: &mut CarePlan, continuation: Continuation) -> FlowReport {
        let mut report = FlowReport::new(&continuation.flow.id, &continuation.ctx.trigger_id);
        let frames: Result<Vec<Frame<'_>>> = continuation
            .frames
            .iter()
            .map(|saved| saved.restore(&continuation.flow))
            .collect();

        match frames {
            Ok(frames) => {
                info!(
                    flow_id = %continuation.flow.id,
                    continuation_id = continuation.id,
                    "Resuming delayed flow"
                );
                self.run(
                    plan,
                    &continuation.flow,
                    &continuation.owner,
                    &continuation.ctx,
                    continuation.resume_at,
                    frames,
                    &mut report,
                );
            }
            Err(e) => report.fail(e),
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn run<'a>(
        &mut self,
        plan: &mut CarePlan,
        flow: &'a ReactiveFlow,
        owner: &FlowOwner,
        ctx: &FiringContext,
        at: OffsetDateTime,
        mut frames: Vec<Frame<'a>>,
        report: &mut FlowReport,
    ) {
        while let Some(frame) = frames.last_mut() {
            let actions = frame.actions;
            let Some(action) = actions.get(frame.next) else {
                frames.pop();
                continue;
            };
            let index = frame.next;
            frame.next += 1;
            let depth = frame.depth;
            let route = frame.route.clone();
            let path = action_path(&route, index);

            debug!(
                flow_id = %flow.id,
                path = %path,
                action = action.action_type(),
                "Evaluating action"
            );

            let effect = match action {
                ReactiveAction::Condition(details) => {
                    match self.branch(plan, owner, ctx, details, depth) {
                        Ok(taken) => {
                            let mut route = route;
                            route.push(BranchStep {
                                index,
                                on_true: taken,
                            });
                            frames.push(Frame {
                                actions: if taken {
                                    details.on_true.as_slice()
                                } else {
                                    details.on_false.as_slice()
                                },
                                next: 0,
                                depth: depth + 1,
                                route,
                            });
                            Ok(ActionEffect::Branched { taken })
                        }
                        Err(e) => Err(e),
                    }
                }
                ReactiveAction::Delay(spec) => self.park(flow, owner, ctx, at, *spec, &frames, &path),
                ReactiveAction::CreateTask(details) => {
                    self.create_task(plan, flow, owner, ctx, at, details, &path)
                }
                ReactiveAction::SendMessage(details) => {
                    self.send_message(flow, ctx, at, details, &path)
                }
                ReactiveAction::TriggerWorkflow(details) => {
                    self.trigger_workflow(flow, ctx, at, details, &path)
                }
                ReactiveAction::Unrecognized { action_type, .. } => {
                    Err(EvaluationError::UnknownActionType {
                        action_type: action_type.clone(),
                        path: format!("{}#{}", flow.id, path),
                    })
                }
            };

            match effect {
                Ok(effect) => {
                    let suspended = match &effect {
                        ActionEffect::Suspended { continuation_id, .. } => Some(*continuation_id),
                        _ => None,
                    };
                    report.outcomes.push(ActionOutcome {
                        path,
                        action_type: action.action_type().to_string(),
                        effect,
                    });
                    if let Some(continuation_id) = suspended {
                        report.status = FlowStatus::Suspended { continuation_id };
                        return;
                    }
                }
                Err(e) => {
                    report.fail(e);
                    return;
                }
            }
        }
        report.status = FlowStatus::Completed;
    }

    // ------------------------------------------------------------------------
    // Condition
    // ------------------------------------------------------------------------

    fn branch(
        &self,
        plan: &CarePlan,
        owner: &FlowOwner,
        ctx: &FiringContext,
        details: &ConditionDetails,
        depth: usize,
    ) -> Result<bool> {
        let nested = depth + 1;
        if nested > self.config.max_condition_depth {
            return Err(EvaluationError::DepthExceeded {
                depth: nested,
                limit: self.config.max_condition_depth,
            });
        }
        let expression = parse_expression(&details.expression)?;
        let scope = build_scope(plan, owner, ctx);
        let taken = expression.evaluate(&scope)?;
        debug!(expression = %details.expression, taken, "Condition evaluated");
        Ok(taken)
    }

    // ------------------------------------------------------------------------
    // Delay
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn park(
        &mut self,
        flow: &ReactiveFlow,
        owner: &FlowOwner,
        ctx: &FiringContext,
        at: OffsetDateTime,
        delay: DurationSpec,
        frames: &[Frame<'_>],
        path: &str,
    ) -> Result<ActionEffect> {
        if delay.is_zero() {
            return Err(EvaluationError::invalid_action(path, "delay must be positive"));
        }
        let resume_at = delay.after(at)?;
        let saved = frames.iter().map(Frame::save).collect();
        let continuation_id = self.delays.park(flow.clone(), owner.clone(), ctx.clone(), saved, resume_at);

        info!(
            flow_id = %flow.id,
            continuation_id,
            resume_at = %resume_at,
            "Flow suspended by delay"
        );
        Ok(ActionEffect::Suspended {
            continuation_id,
            resume_at,
        })
    }

    // ------------------------------------------------------------------------
    // CreateTask
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn create_task(
        &mut self,
        plan: &mut CarePlan,
        flow: &ReactiveFlow,
        owner: &FlowOwner,
        ctx: &FiringContext,
        at: OffsetDateTime,
        details: &CreateTaskDetails,
        path: &str,
    ) -> Result<ActionEffect> {
        if details.title.trim().is_empty() {
            return Err(EvaluationError::invalid_action(path, "title is required"));
        }
        if let Some(schedule) = &details.schedule {
            schedule.validate()?;
        }

        let goal_id = owner
            .goal_id
            .as_deref()
            .or(ctx.goal_id.as_deref())
            .ok_or_else(|| {
                EvaluationError::configuration(format!("flow {} has no goal to create tasks in", flow.id))
            })?
            .to_string();
        let goal = plan
            .goal(&goal_id)
            .ok_or_else(|| EvaluationError::configuration(format!("goal {goal_id} not found")))?;

        let owning_task = owner.task_id.as_deref().and_then(|id| goal.task(id));
        let trigger_config = details
            .trigger_config
            .or_else(|| owning_task.and_then(|t| t.trigger_config));
        let window = details
            .trigger_config
            .and_then(|tc| tc.deduplication_window)
            .or_else(|| owning_task.and_then(|t| t.trigger_config).and_then(|tc| tc.deduplication_window))
            .or(self.config.default_dedup_window);

        let template = details
            .template_id
            .clone()
            .or_else(|| flow.source_template_id.clone())
            .unwrap_or_else(|| format!("{}#{}", flow.id, path));
        let key = DedupKey {
            goal_id: goal_id.clone(),
            template: template.clone(),
            instance: ctx.dedup_instance().to_string(),
        };

        if let Some(window) = window
            && let Some(existing) = self.dedup.recent(&key, at, window)?
            && goal.task(existing).is_some()
        {
            debug!(
                flow_id = %flow.id,
                goal_id = %goal_id,
                template = %template,
                task_id = %existing,
                "Skipping duplicate task inside deduplication window"
            );
            return Ok(ActionEffect::TaskDeduplicated {
                goal_id,
                task_id: existing.to_string(),
            });
        }

        let activation = trigger_config.map(|tc| tc.activation_time(at)).transpose()?;
        let due_date = match (details.due_date, details.due_offset) {
            (Some(explicit), _) => Some(explicit),
            (None, Some(offset)) => Some(offset.after(at)?),
            (None, None) => match (trigger_config, activation) {
                (Some(tc), Some(activation)) => tc.due_date_policy.due_date(activation)?,
                _ => None,
            },
        };

        let mut task = Task::new(details.title.clone());
        task.description.clone_from(&details.description);
        task.priority = details.priority.unwrap_or_default();
        task.category.clone_from(&details.category);
        task.performer.clone_from(&details.subject_role);
        task.due_date = due_date;
        task.activation_date = activation;
        task.start_triggers = vec![ctx.trigger_id.clone()];
        task.schedule.clone_from(&details.schedule);
        task.trigger_config = details.trigger_config;
        task.source_template_id = details
            .template_id
            .clone()
            .or_else(|| flow.source_template_id.clone());
        task.source_template_name.clone_from(&flow.source_template_name);
        task.extra.clone_from(&details.extra);
        let task_id = task.id.clone();

        plan.goal_mut(&goal_id)
            .ok_or_else(|| EvaluationError::configuration(format!("goal {goal_id} not found")))?
            .tasks
            .push(task);
        if let Some(window) = window {
            self.dedup.record(key, at, window, task_id.clone())?;
        }

        info!(
            flow_id = %flow.id,
            goal_id = %goal_id,
            task_id = %task_id,
            due_date = ?due_date,
            "Created task from reactive flow"
        );
        Ok(ActionEffect::TaskCreated { goal_id, task_id })
    }

    // ------------------------------------------------------------------------
    // Hand-offs
    // ------------------------------------------------------------------------

    fn send_message(
        &self,
        flow: &ReactiveFlow,
        ctx: &FiringContext,
        at: OffsetDateTime,
        details: &SendMessageDetails,
        path: &str,
    ) -> Result<ActionEffect> {
        if details.recipient.trim().is_empty() {
            return Err(EvaluationError::invalid_action(path, "recipient is required"));
        }
        if details.message.trim().is_empty() {
            return Err(EvaluationError::invalid_action(path, "message is required"));
        }

        let recipient = self.renderer.render(&details.recipient, &ctx.params);
        let message = OutboundMessage {
            channel: details.channel,
            recipient: recipient.clone(),
            subject: details
                .subject
                .as_ref()
                .map(|s| self.renderer.render(s, &ctx.params)),
            body: self.renderer.render(&details.message, &ctx.params),
            flow_id: flow.id.clone(),
            trigger_id: ctx.trigger_id.clone(),
            created_at: at,
        };

        self.notifier
            .dispatch(message)
            .map_err(|message| EvaluationError::Collaborator {
                collaborator: "notification dispatcher",
                message,
            })?;
        debug!(flow_id = %flow.id, channel = %details.channel, "Message handed off");
        Ok(ActionEffect::MessageDispatched {
            channel: details.channel,
            recipient,
        })
    }

    fn trigger_workflow(
        &self,
        flow: &ReactiveFlow,
        ctx: &FiringContext,
        at: OffsetDateTime,
        details: &TriggerWorkflowDetails,
        path: &str,
    ) -> Result<ActionEffect> {
        if details.workflow_id.trim().is_empty() {
            return Err(EvaluationError::invalid_action(path, "workflowId is required"));
        }
        if details.endpoint.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(EvaluationError::invalid_action(path, "endpoint must not be empty when set"));
        }

        let mut payload = match &details.payload {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
            None => serde_json::Map::new(),
        };
        for (key, value) in &ctx.params {
            payload.entry(key.clone()).or_insert_with(|| value.clone());
        }

        self.launcher
            .launch(WorkflowRequest {
                workflow_id: details.workflow_id.clone(),
                endpoint: details.endpoint.clone(),
                payload: Value::Object(payload),
                flow_id: flow.id.clone(),
                trigger_id: ctx.trigger_id.clone(),
                requested_at: at,
            })
            .map_err(|message| EvaluationError::Collaborator {
                collaborator: "workflow launcher",
                message,
            })?;
        debug!(flow_id = %flow.id, workflow_id = %details.workflow_id, "Workflow handed off");
        Ok(ActionEffect::WorkflowLaunched {
            workflow_id: details.workflow_id.clone(),
        })
    }
}

// ============================================================================
// Condition scope
// ============================================================================

/// JSON view of current state: `{ params, trigger, goal, task }`.
fn build_scope(plan: &CarePlan, owner: &FlowOwner, ctx: &FiringContext) -> Value {
    let goal = owner
        .goal_id
        .as_deref()
        .or(ctx.goal_id.as_deref())
        .and_then(|id| plan.goal(id));
    let task = owner
        .task_id
        .as_deref()
        .or(ctx.task_id.as_deref())
        .and_then(|id| plan.find_task(id))
        .map(|(_, task)| task.to_scope())
        .unwrap_or(Value::Null);

    json!({
        "params": ctx.params,
        "trigger": {
            "id": ctx.trigger_id,
            "firedAt": careplan_core::time::format_datetime(ctx.fired_at),
            "instanceKey": ctx.instance_key,
        },
        "goal": goal.map(goal_scope).unwrap_or(Value::Null),
        "task": task,
    })
}

/// Unset optional fields are left out so conditions on them fail as missing.
fn goal_scope(goal: &Goal) -> Value {
    let metrics: Map<String, Value> = goal
        .metrics
        .iter()
        .map(|m| {
            let mut metric = Map::new();
            insert_some(&mut metric, "unit", m.unit.as_ref().map(|u| json!(u)));
            insert_some(&mut metric, "targetValue", m.target_value.map(|v| json!(v)));
            insert_some(&mut metric, "currentValue", m.current_value.map(|v| json!(v)));
            insert_some(&mut metric, "frequency", m.frequency.as_ref().map(|f| json!(f)));
            (m.name.clone(), Value::Object(metric))
        })
        .collect();

    let mut scope = Map::new();
    scope.insert("id".into(), json!(goal.id));
    scope.insert("title".into(), json!(goal.title));
    scope.insert("status".into(), json!(goal.status));
    insert_some(&mut scope, "condition", goal.condition.as_ref().map(|c| json!(c)));
    insert_some(
        &mut scope,
        "targetDate",
        goal.target_date.map(|d| json!(careplan_core::time::format_datetime(d))),
    );
    scope.insert("metrics".into(), Value::Object(metrics));
    scope.insert("taskCount".into(), json!(goal.tasks.len()));
    scope.insert("linkedQualityMeasures".into(), json!(goal.linked_quality_measures));
    scope.insert("targetsMet".into(), json!(goal.targets_met()));
    Value::Object(scope)
}

fn insert_some(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}
