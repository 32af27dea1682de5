//! Reactive engine: dispatches trigger firings to registered flows.

use careplan_core::{CarePlan, CoreError, Goal, ReactiveFlow, Task, TaskStatus, TriggerCatalog};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::error::{EvaluationError, Result};
use crate::evaluator::{ActionEvaluator, EvaluatorConfig, FiringContext, FlowReport};
use crate::notify::NotificationDispatcher;
use crate::registry::{FlowOwner, FlowRegistry};
use crate::workflow::WorkflowLauncher;

/// Trigger id fired by [`ReactiveEngine::complete_task`].
pub const TASK_COMPLETED: &str = "task_completed";

pub struct ReactiveEngine {
    catalog: Arc<TriggerCatalog>,
    registry: FlowRegistry,
    evaluator: ActionEvaluator,
}

impl ReactiveEngine {
    pub fn new(
        notifier: Arc<dyn NotificationDispatcher>,
        launcher: Arc<dyn WorkflowLauncher>,
    ) -> Self {
        Self::with_config(EvaluatorConfig::default(), notifier, launcher)
    }

    pub fn with_config(
        config: EvaluatorConfig,
        notifier: Arc<dyn NotificationDispatcher>,
        launcher: Arc<dyn WorkflowLauncher>,
    ) -> Self {
        Self {
            catalog: Arc::new(TriggerCatalog::standard().clone()),
            registry: FlowRegistry::new(),
            evaluator: ActionEvaluator::new(config, notifier, launcher),
        }
    }

    /// Use a catalog other than the standard one.
    pub fn with_catalog(mut self, catalog: Arc<TriggerCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &TriggerCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &FlowRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FlowRegistry {
        &mut self.registry
    }

    pub fn register(&mut self, flow: ReactiveFlow, owner: FlowOwner) {
        if !self.catalog.contains(&flow.trigger.id) {
            warn!(
                flow_id = %flow.id,
                trigger = %flow.trigger.id,
                "Flow bound to a trigger outside the catalog"
            );
        }
        self.registry.register_with(flow, owner);
    }

    /// Register every flow declared on the plan's tasks.
    pub fn register_care_plan(&mut self, plan: &CarePlan) -> usize {
        let count = self.registry.register_care_plan(plan);
        for trigger in self.registry.dangling_triggers(&self.catalog) {
            warn!(trigger = %trigger, "Registered flows reference an unknown trigger");
        }
        info!(patient_id = %plan.patient_id, flows = count, "Registered care plan flows");
        count
    }

    /// Run every flow bound to the fired trigger, in registration order.
    ///
    /// When the firing names a task, flows declared on other tasks are
    /// skipped. A failing flow is reported and does not stop its siblings.
    pub fn fire(&mut self, plan: &mut CarePlan, ctx: &FiringContext) -> Result<Vec<FlowReport>> {
        if !self.catalog.contains(&ctx.trigger_id) {
            warn!(trigger = %ctx.trigger_id, "Ignoring unknown trigger");
            return Err(EvaluationError::UnknownTrigger(ctx.trigger_id.clone()));
        }
        self.prune_dedup(ctx.fired_at);

        let flows: Vec<_> = self
            .registry
            .flows_for(&ctx.trigger_id)
            .into_iter()
            .filter(|registered| owned_by_firing_task(&registered.owner, ctx))
            .cloned()
            .collect();

        if flows.is_empty() {
            debug!(trigger = %ctx.trigger_id, "No flows registered for trigger");
            return Ok(Vec::new());
        }

        info!(
            trigger = %ctx.trigger_id,
            flows = flows.len(),
            "Dispatching trigger to reactive flows"
        );

        let mut reports = Vec::with_capacity(flows.len());
        for registered in &flows {
            let report = self.evaluator.evaluate(plan, registered, ctx);
            log_report(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// Resume every delayed flow due at `now`.
    pub fn resume_due(&mut self, plan: &mut CarePlan, now: OffsetDateTime) -> Vec<FlowReport> {
        self.prune_dedup(now);
        let due = self.evaluator.delays_mut().take_due(now);
        due.into_iter()
            .map(|continuation| {
                let report = self.evaluator.resume(plan, continuation);
                log_report(&report);
                report
            })
            .collect()
    }

    /// Remove a goal with its flows, pending delays and deduplication history.
    pub fn remove_goal(&mut self, plan: &mut CarePlan, goal_id: &str) -> Option<Goal> {
        let goal = plan.remove_goal(goal_id)?;
        let cancelled = self.evaluator.delays_mut().cancel_for_goal(goal_id);
        let flows = self.registry.remove_owned_by_goal(goal_id);
        self.evaluator.dedup_mut().forget_goal(goal_id);
        for task in &goal.tasks {
            self.evaluator.delays_mut().cancel_for_task(&task.id);
        }
        info!(goal_id = %goal_id, cancelled, flows, "Removed goal");
        Some(goal)
    }

    /// Remove a task with its flows and pending delays.
    pub fn remove_task(&mut self, plan: &mut CarePlan, goal_id: &str, task_id: &str) -> Result<Task> {
        let task = plan.remove_task(goal_id, task_id)?;
        let cancelled = self.evaluator.delays_mut().cancel_for_task(task_id);
        let flows = self.registry.remove_owned_by_task(task_id);
        info!(goal_id = %goal_id, task_id = %task_id, cancelled, flows, "Removed task");
        Ok(task)
    }

    /// Mark a task completed and fire `task_completed` for it.
    pub fn complete_task(
        &mut self,
        plan: &mut CarePlan,
        goal_id: &str,
        task_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<FlowReport>> {
        let task = plan
            .goal_mut(goal_id)
            .and_then(|goal| goal.task_mut(task_id))
            .ok_or_else(|| CoreError::not_found("task", task_id))?;
        task.status = TaskStatus::Completed;

        let ctx = FiringContext::new(TASK_COMPLETED, now)
            .with_instance_key(task_id)
            .with_param("taskId", task_id)
            .for_task(goal_id, task_id);
        self.fire(plan, &ctx)
    }

    fn prune_dedup(&mut self, now: OffsetDateTime) {
        let pruned = self.evaluator.dedup_mut().prune_expired(now);
        if pruned > 0 {
            debug!(pruned, "Pruned expired deduplication entries");
        }
    }

    pub fn pending_delays(&self) -> usize {
        self.evaluator.delays().len()
    }

    pub fn next_resume_at(&self) -> Option<OffsetDateTime> {
        self.evaluator.delays().next_due()
    }
}

fn owned_by_firing_task(owner: &FlowOwner, ctx: &FiringContext) -> bool {
    match (owner.task_id.as_deref(), ctx.task_id.as_deref()) {
        (Some(owning), Some(fired)) => owning == fired,
        _ => true,
    }
}

fn log_report(report: &FlowReport) {
    match &report.error {
        Some(error) => warn!(
            flow_id = %report.flow_id,
            trigger = %report.trigger_id,
            kind = %error.kind(),
            error = %error,
            "Reactive flow failed"
        ),
        None => info!(
            flow_id = %report.flow_id,
            trigger = %report.trigger_id,
            status = ?report.status,
            actions = report.outcomes.len(),
            "Reactive flow evaluated"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingDispatcher;
    use crate::workflow::RecordingLauncher;
    use careplan_core::{CreateTaskDetails, ReactiveAction};
    use time::macros::datetime;

    fn engine() -> ReactiveEngine {
        ReactiveEngine::new(
            Arc::new(RecordingDispatcher::new()),
            Arc::new(RecordingLauncher::new()),
        )
    }

    #[test]
    fn test_unknown_trigger_runs_nothing() {
        let mut engine = engine();
        let mut plan = CarePlan::new("p1");
        plan.add_goal(Goal::with_id("g1", "BP")).unwrap();
        engine.register(
            ReactiveFlow::new("f1", "not_a_trigger")
                .with_action(ReactiveAction::create_task(CreateTaskDetails::new("x"))),
            FlowOwner::goal("g1"),
        );

        let err = engine
            .fire(&mut plan, &FiringContext::new("not_a_trigger", datetime!(2024-06-01 00:00:00 UTC)))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::UnknownTrigger(_)));
        assert!(plan.goal("g1").unwrap().tasks.is_empty());
    }

    #[test]
    fn test_no_flows_is_empty_result() {
        let mut engine = engine();
        let mut plan = CarePlan::new("p1");
        let reports = engine
            .fire(&mut plan, &FiringContext::new("hospital_admission", datetime!(2024-06-01 00:00:00 UTC)))
            .unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_complete_task_fires_task_completed() {
        let mut engine = engine();
        let mut plan = CarePlan::new("p1");
        let mut goal = Goal::with_id("g1", "BP");
        let mut task = careplan_core::Task::with_id("t1", "Measure BP");
        task.reactive_flows.push(
            ReactiveFlow::new("f1", TASK_COMPLETED)
                .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Review readings"))),
        );
        goal.add_task(task).unwrap();
        plan.add_goal(goal).unwrap();
        engine.register_care_plan(&plan);

        let reports = engine
            .complete_task(&mut plan, "g1", "t1", datetime!(2024-06-01 00:00:00 UTC))
            .unwrap();
        assert_eq!(reports.len(), 1);
        let goal = plan.goal("g1").unwrap();
        assert_eq!(goal.task("t1").unwrap().status, TaskStatus::Completed);
        assert_eq!(goal.tasks.len(), 2);
    }

    #[test]
    fn test_fire_prunes_expired_dedup_entries() {
        let mut engine = engine();
        let mut plan = CarePlan::new("p1");
        plan.add_goal(Goal::with_id("g1", "BP")).unwrap();

        let mut details = CreateTaskDetails::new("Call patient");
        details.trigger_config = Some(careplan_core::TriggerConfig {
            deduplication_window: Some(careplan_core::DurationSpec::hours(24)),
            ..careplan_core::TriggerConfig::default()
        });
        engine.register(
            ReactiveFlow::new("f1", "appointment_missed")
                .with_action(ReactiveAction::create_task(details)),
            FlowOwner::goal("g1"),
        );

        for (instance, at) in [
            ("appt-1", datetime!(2024-06-01 08:00:00 UTC)),
            ("appt-2", datetime!(2024-06-01 09:00:00 UTC)),
        ] {
            let ctx = FiringContext::new("appointment_missed", at).with_instance_key(instance);
            engine.fire(&mut plan, &ctx).unwrap();
        }
        assert_eq!(engine.evaluator.dedup_mut().len(), 2);

        let later = FiringContext::new("appointment_missed", datetime!(2024-06-02 08:30:00 UTC))
            .with_instance_key("appt-3");
        engine.fire(&mut plan, &later).unwrap();
        assert_eq!(engine.evaluator.dedup_mut().len(), 2);

        engine.resume_due(&mut plan, datetime!(2024-06-03 12:00:00 UTC));
        assert!(engine.evaluator.dedup_mut().is_empty());
    }
}
