use std::sync::Arc;

use careplan_core::{
    CarePlan, CreateTaskDetails, DurationSpec, Goal, ReactiveAction, ReactiveFlow,
    SendMessageDetails, MessageChannel, Task, TimeUnit, TriggerConfig,
};
use careplan_reactive::{
    ActionEffect, ErrorKind, EvaluationError, EvaluatorConfig, FiringContext, FlowOwner,
    ReactiveEngine, RecordingDispatcher, RecordingLauncher,
};
use serde_json::json;
use time::macros::datetime;

fn plan_with_goal() -> CarePlan {
    let mut plan = CarePlan::new("patient-1");
    plan.add_goal(Goal::with_id("g1", "Blood pressure under 130/80"))
        .expect("add goal");
    plan
}

fn engine() -> (ReactiveEngine, Arc<RecordingDispatcher>) {
    let notifier = Arc::new(RecordingDispatcher::new());
    let engine = ReactiveEngine::new(notifier.clone(), Arc::new(RecordingLauncher::new()));
    (engine, notifier)
}

fn titles(plan: &CarePlan) -> Vec<String> {
    plan.goal("g1")
        .expect("goal")
        .tasks
        .iter()
        .map(|t| t.title.clone())
        .collect()
}

#[test]
fn due_offset_sets_due_date_relative_to_event() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();

    let mut details = CreateTaskDetails::new("Recheck blood pressure");
    details.due_offset = Some(DurationSpec::new(3, TimeUnit::Days));
    engine.register(
        ReactiveFlow::new("bp-high", "observation_out_of_range")
            .with_action(ReactiveAction::create_task(details)),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("observation_out_of_range", datetime!(2024-06-01 00:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");
    assert!(reports[0].is_completed());

    let task = &plan.goal("g1").expect("goal").tasks[0];
    assert_eq!(task.due_date, Some(datetime!(2024-06-04 00:00:00 UTC)));
}

#[test]
fn deduplication_window_suppresses_repeat_firings() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();

    let mut details = CreateTaskDetails::new("Call patient");
    details.template_id = Some("T1".into());
    details.trigger_config = Some(TriggerConfig {
        deduplication_window: Some(DurationSpec::hours(24)),
        ..TriggerConfig::default()
    });
    engine.register(
        ReactiveFlow::new("missed", "appointment_missed")
            .with_action(ReactiveAction::create_task(details)),
        FlowOwner::goal("g1"),
    );

    let first = FiringContext::new("appointment_missed", datetime!(2024-06-01 08:00:00 UTC));
    let inside = FiringContext::new("appointment_missed", datetime!(2024-06-01 20:00:00 UTC));
    let outside = FiringContext::new("appointment_missed", datetime!(2024-06-02 09:00:00 UTC));

    engine.fire(&mut plan, &first).expect("first");
    let repeat = engine.fire(&mut plan, &inside).expect("inside");
    assert!(matches!(
        repeat[0].outcomes[0].effect,
        ActionEffect::TaskDeduplicated { .. }
    ));
    assert_eq!(titles(&plan).len(), 1);

    engine.fire(&mut plan, &outside).expect("outside");
    assert_eq!(titles(&plan).len(), 2);
}

#[test]
fn deduplication_distinguishes_event_instances() {
    let mut engine = ReactiveEngine::with_config(
        EvaluatorConfig {
            default_dedup_window: Some(DurationSpec::days(1)),
            ..EvaluatorConfig::default()
        },
        Arc::new(RecordingDispatcher::new()),
        Arc::new(RecordingLauncher::new()),
    );
    let mut plan = plan_with_goal();
    engine.register(
        ReactiveFlow::new("lab", "lab_result_received")
            .with_source_template("lab-review")
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Review lab"))),
        FlowOwner::goal("g1"),
    );

    let at = datetime!(2024-06-01 08:00:00 UTC);
    for key in ["obs-1", "obs-2", "obs-1"] {
        let ctx = FiringContext::new("lab_result_received", at).with_instance_key(key);
        engine.fire(&mut plan, &ctx).expect("fire");
    }
    assert_eq!(titles(&plan).len(), 2);
    let task = &plan.goal("g1").expect("goal").tasks[0];
    assert_eq!(task.source_template_id.as_deref(), Some("lab-review"));
}

#[test]
fn deleted_task_does_not_block_recreation() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    let mut details = CreateTaskDetails::new("Call patient");
    details.template_id = Some("T1".into());
    details.trigger_config = Some(TriggerConfig {
        deduplication_window: Some(DurationSpec::days(7)),
        ..TriggerConfig::default()
    });
    engine.register(
        ReactiveFlow::new("missed", "appointment_missed")
            .with_action(ReactiveAction::create_task(details)),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("appointment_missed", datetime!(2024-06-01 08:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");
    let created = reports[0].created_tasks()[0].to_string();
    engine.remove_task(&mut plan, "g1", &created).expect("remove");

    engine.fire(&mut plan, &ctx).expect("fire again");
    assert_eq!(titles(&plan).len(), 1);
}

#[test]
fn actions_apply_in_declaration_order() {
    let (mut engine, notifier) = engine();
    let mut plan = plan_with_goal();
    engine.register(
        ReactiveFlow::new("discharge", "hospital_discharge")
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("A1")))
            .with_action(ReactiveAction::SendMessage(SendMessageDetails {
                channel: MessageChannel::Sms,
                recipient: "patient".into(),
                message: "Welcome home".into(),
                subject: None,
            }))
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("A3"))),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("hospital_discharge", datetime!(2024-06-01 00:00:00 UTC));
    engine.fire(&mut plan, &ctx).expect("fire");

    assert_eq!(titles(&plan), vec!["A1", "A3"]);
    assert_eq!(notifier.len(), 1);
}

#[test]
fn condition_selects_branch_from_event_parameters() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    engine.register(
        ReactiveFlow::new("bp", "observation_recorded").with_action(ReactiveAction::condition(
            "params.systolic ge 180 or params.diastolic ge 120",
            vec![ReactiveAction::create_task(CreateTaskDetails::new("Urgent review"))],
            vec![ReactiveAction::create_task(CreateTaskDetails::new("Routine review"))],
        )),
        FlowOwner::goal("g1"),
    );

    let crisis = FiringContext::new("observation_recorded", datetime!(2024-06-01 00:00:00 UTC))
        .with_param("systolic", 150)
        .with_param("diastolic", 125);
    let normal = FiringContext::new("observation_recorded", datetime!(2024-06-01 01:00:00 UTC))
        .with_param("systolic", 128)
        .with_param("diastolic", 82);
    engine.fire(&mut plan, &crisis).expect("crisis");
    engine.fire(&mut plan, &normal).expect("normal");

    assert_eq!(titles(&plan), vec!["Urgent review", "Routine review"]);
}

#[test]
fn condition_on_missing_field_fails_without_effects() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    engine.register(
        ReactiveFlow::new("bp", "observation_recorded").with_action(ReactiveAction::condition(
            "params.systolic gt 180",
            vec![ReactiveAction::create_task(CreateTaskDetails::new("Urgent"))],
            vec![ReactiveAction::create_task(CreateTaskDetails::new("Routine"))],
        )),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("observation_recorded", datetime!(2024-06-01 00:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");
    assert_eq!(reports[0].error_kind(), Some(ErrorKind::Validation));
    assert!(titles(&plan).is_empty());
}

#[test]
fn condition_reads_goal_state() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    plan.goal_mut("g1").expect("goal").condition = Some("Hypertension".into());
    engine.register(
        ReactiveFlow::new("update", "care_plan_updated").with_action(ReactiveAction::condition(
            "goal.condition co hypertension and goal.taskCount eq 0",
            vec![ReactiveAction::create_task(CreateTaskDetails::new("Home BP monitoring"))],
            vec![],
        )),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("care_plan_updated", datetime!(2024-06-01 00:00:00 UTC));
    engine.fire(&mut plan, &ctx).expect("first");
    engine.fire(&mut plan, &ctx).expect("second");
    assert_eq!(titles(&plan), vec!["Home BP monitoring"]);
}

#[test]
fn condition_on_unset_goal_field_fails_without_effects() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    plan.goal_mut("g1")
        .expect("goal")
        .upsert_metric(careplan_core::GoalMetric::new("HbA1c"));
    engine.register(
        ReactiveFlow::new("dx", "care_plan_updated").with_action(ReactiveAction::condition(
            "goal.condition eq \"diabetes\"",
            vec![ReactiveAction::create_task(CreateTaskDetails::new("true"))],
            vec![ReactiveAction::create_task(CreateTaskDetails::new("false"))],
        )),
        FlowOwner::goal("g1"),
    );
    engine.register(
        ReactiveFlow::new("a1c", "care_plan_updated").with_action(ReactiveAction::condition(
            "goal.metrics.HbA1c.currentValue gt 7",
            vec![ReactiveAction::create_task(CreateTaskDetails::new("high"))],
            vec![ReactiveAction::create_task(CreateTaskDetails::new("ok"))],
        )),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("care_plan_updated", datetime!(2024-06-01 00:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.is_failed());
        assert_eq!(report.error_kind(), Some(ErrorKind::Validation));
    }
    assert!(titles(&plan).is_empty());
}

#[test]
fn task_completion_runs_only_the_completed_tasks_flows() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    for (task_id, title) in [("t1", "Measure BP"), ("t2", "Refill meds")] {
        let mut task = Task::with_id(task_id, title);
        task.reactive_flows.push(
            ReactiveFlow::new(format!("after-{task_id}"), "task_completed").with_action(
                ReactiveAction::create_task(CreateTaskDetails::new(format!("after {task_id}"))),
            ),
        );
        plan.goal_mut("g1").expect("goal").add_task(task).expect("add task");
    }
    engine.register_care_plan(&plan);

    let reports = engine
        .complete_task(&mut plan, "g1", "t1", datetime!(2024-06-01 00:00:00 UTC))
        .expect("complete");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].flow_id, "after-t1");
    assert_eq!(titles(&plan), vec!["Measure BP", "Refill meds", "after t1"]);

    engine
        .complete_task(&mut plan, "g1", "t2", datetime!(2024-06-01 01:00:00 UTC))
        .expect("complete");
    assert_eq!(
        titles(&plan),
        vec!["Measure BP", "Refill meds", "after t1", "after t2"]
    );
}

#[test]
fn nesting_beyond_limit_is_structure_error() {
    let mut engine = ReactiveEngine::with_config(
        EvaluatorConfig {
            max_condition_depth: 2,
            ..EvaluatorConfig::default()
        },
        Arc::new(RecordingDispatcher::new()),
        Arc::new(RecordingLauncher::new()),
    );
    let mut plan = plan_with_goal();

    let mut nested = ReactiveAction::create_task(CreateTaskDetails::new("Deep"));
    for _ in 0..3 {
        nested = ReactiveAction::condition("trigger.id pr true", vec![nested], vec![]);
    }
    engine.register(
        ReactiveFlow::new("deep", "assessment_due").with_action(nested),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("assessment_due", datetime!(2024-06-01 00:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");
    assert_eq!(reports[0].error_kind(), Some(ErrorKind::Structure));
    assert!(titles(&plan).is_empty());
}

#[test]
fn unknown_trigger_is_rejected() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    let ctx = FiringContext::new("weather_changed", datetime!(2024-06-01 00:00:00 UTC));

    let err = engine.fire(&mut plan, &ctx).expect_err("unknown trigger");
    assert!(matches!(err, EvaluationError::UnknownTrigger(ref id) if id == "weather_changed"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn unknown_action_type_stops_flow_after_earlier_effects() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    let flow: ReactiveFlow = serde_json::from_value(json!({
        "id": "overdue",
        "trigger": {"id": "task_overdue"},
        "actions": [
            {"actionType": "CreateTask", "actionDetails": {"title": "A1"}},
            {"actionType": "PageOnCall", "actionDetails": {"team": "cardiology"}},
            {"actionType": "CreateTask", "actionDetails": {"title": "A3"}}
        ]
    }))
    .expect("deserialize flow");
    engine.register(flow, FlowOwner::goal("g1"));

    let ctx = FiringContext::new("task_overdue", datetime!(2024-06-01 00:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");

    assert!(reports[0].is_failed());
    assert!(matches!(
        reports[0].error,
        Some(EvaluationError::UnknownActionType { ref action_type, .. }) if action_type == "PageOnCall"
    ));
    assert_eq!(titles(&plan), vec!["A1"]);
}

#[test]
fn failing_flow_does_not_affect_siblings() {
    let notifier = Arc::new(RecordingDispatcher::rejecting());
    let mut engine = ReactiveEngine::new(notifier, Arc::new(RecordingLauncher::new()));
    let mut plan = plan_with_goal();

    engine.register(
        ReactiveFlow::new("notify", "medication_missed").with_action(ReactiveAction::SendMessage(
            SendMessageDetails {
                channel: MessageChannel::Push,
                recipient: "patient".into(),
                message: "Reminder".into(),
                subject: None,
            },
        )),
        FlowOwner::goal("g1"),
    );
    engine.register(
        ReactiveFlow::new("followup", "medication_missed")
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Adherence call"))),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("medication_missed", datetime!(2024-06-01 00:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");

    assert!(reports[0].is_failed());
    assert!(reports[1].is_completed());
    assert_eq!(titles(&plan), vec!["Adherence call"]);
}

#[test]
fn delayed_actions_resume_when_due() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    engine.register(
        ReactiveFlow::new("discharge", "hospital_discharge")
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Med reconciliation")))
            .with_action(ReactiveAction::Delay(DurationSpec::new(2, TimeUnit::Days)))
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Follow-up visit"))),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("hospital_discharge", datetime!(2024-06-01 10:00:00 UTC));
    let reports = engine.fire(&mut plan, &ctx).expect("fire");
    assert!(reports[0].is_suspended());
    assert_eq!(engine.pending_delays(), 1);
    assert_eq!(engine.next_resume_at(), Some(datetime!(2024-06-03 10:00:00 UTC)));

    assert!(engine.resume_due(&mut plan, datetime!(2024-06-02 10:00:00 UTC)).is_empty());
    let resumed = engine.resume_due(&mut plan, datetime!(2024-06-03 10:00:00 UTC));
    assert!(resumed[0].is_completed());
    assert_eq!(titles(&plan), vec!["Med reconciliation", "Follow-up visit"]);
    assert_eq!(engine.pending_delays(), 0);
}

#[test]
fn removing_goal_cancels_pending_delays() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    engine.register(
        ReactiveFlow::new("discharge", "hospital_discharge")
            .with_action(ReactiveAction::Delay(DurationSpec::hours(4)))
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Call"))),
        FlowOwner::goal("g1"),
    );

    let ctx = FiringContext::new("hospital_discharge", datetime!(2024-06-01 10:00:00 UTC));
    engine.fire(&mut plan, &ctx).expect("fire");
    assert_eq!(engine.pending_delays(), 1);

    engine.remove_goal(&mut plan, "g1").expect("goal removed");
    assert_eq!(engine.pending_delays(), 0);
    assert!(engine.registry().is_empty());
    assert!(engine.resume_due(&mut plan, datetime!(2024-06-02 00:00:00 UTC)).is_empty());
}

#[test]
fn removing_task_cancels_its_flows_and_delays() {
    let (mut engine, _) = engine();
    let mut plan = plan_with_goal();
    let mut task = Task::with_id("t1", "Daily BP reading");
    task.reactive_flows.push(
        ReactiveFlow::new("reading", "observation_out_of_range")
            .with_action(ReactiveAction::Delay(DurationSpec::hours(1)))
            .with_action(ReactiveAction::create_task(CreateTaskDetails::new("Recheck"))),
    );
    plan.goal_mut("g1").expect("goal").add_task(task).expect("add task");
    assert_eq!(engine.register_care_plan(&plan), 1);

    let ctx = FiringContext::new("observation_out_of_range", datetime!(2024-06-01 10:00:00 UTC));
    engine.fire(&mut plan, &ctx).expect("fire");
    assert_eq!(engine.pending_delays(), 1);

    engine.remove_task(&mut plan, "g1", "t1").expect("remove");
    assert_eq!(engine.pending_delays(), 0);
    assert!(engine.registry().is_empty());
    assert!(titles(&plan).is_empty());
}
