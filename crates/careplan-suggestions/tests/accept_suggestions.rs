use std::sync::Arc;
use std::time::Duration;

use careplan_core::{CarePlan, GoalMetric};
use careplan_suggestions::{MockSuggestionService, SuggestionClient};

fn client() -> SuggestionClient {
    SuggestionClient::new(Arc::new(MockSuggestionService::new(Duration::from_millis(800))))
        .with_timeout(Duration::from_secs(10))
}

#[tokio::test(start_paused = true)]
async fn accepted_goal_suggestions_land_in_plan() {
    let client = client();
    let mut plan = CarePlan::new("patient-1");

    let suggestions = client
        .spawn_goals(vec!["Type 2 diabetes".into(), "Hypertension".into()])
        .wait()
        .await
        .expect("goal suggestions");
    let added = plan.accept_goal_suggestions(suggestions);

    assert_eq!(added.len(), 4);
    let goal = plan.goal(&added[0]).expect("goal added");
    assert_eq!(goal.title, "Achieve glycemic control");
    assert_eq!(goal.condition.as_deref(), Some("Type 2 diabetes mellitus"));
    assert!(goal.metric("HbA1c").is_some());
}

#[tokio::test(start_paused = true)]
async fn target_update_patch_applies_to_goal() {
    let client = client();
    let mut plan = CarePlan::new("patient-1");
    let suggestions = client
        .spawn_goals(vec!["Hypertension".into()])
        .wait()
        .await
        .expect("goal suggestions");
    let goal_id = plan.accept_goal_suggestions(suggestions)[0].clone();

    let goal = plan.goal_mut(&goal_id).expect("goal");
    let mut systolic = goal.metric("Systolic BP").cloned().expect("metric");
    systolic.target_value = Some(140.0);
    systolic.current_value = Some(152.0);
    goal.upsert_metric(systolic);

    let snapshot = goal.clone();
    let update = client
        .spawn_target_update(snapshot)
        .wait()
        .await
        .expect("target update");
    plan.goal_mut(&goal_id)
        .expect("goal")
        .apply_patch(update.suggestion)
        .expect("apply patch");

    let metric = plan.goal(&goal_id).expect("goal").metric("Systolic BP").expect("metric");
    assert_eq!(metric.target_value, Some(130.0));
    assert_eq!(metric.current_value, Some(152.0));
}

#[tokio::test(start_paused = true)]
async fn task_targets_fill_metrics_without_targets() {
    let client = client();
    let mut plan = CarePlan::new("patient-1");
    let suggestions = client
        .spawn_goals(vec!["Depression".into()])
        .wait()
        .await
        .expect("goal suggestions");
    let goal_id = plan.accept_goal_suggestions(suggestions)[0].clone();

    let goal = plan.goal_mut(&goal_id).expect("goal");
    goal.upsert_metric(GoalMetric::new("GAD-7 score"));
    goal.upsert_metric(GoalMetric::new("PHQ-9 score"));

    let targets = client
        .spawn_task_targets(goal.clone())
        .wait()
        .await
        .expect("task targets");
    assert_eq!(targets.len(), 1);
    for partial in targets {
        let goal = plan.goal_mut(&goal_id).expect("goal");
        let mut metric = goal.metric(&partial.name).cloned().expect("metric");
        metric.merge(&partial);
        goal.upsert_metric(metric);
    }

    let goal = plan.goal(&goal_id).expect("goal");
    assert_eq!(goal.metric("PHQ-9 score").and_then(|m| m.target_value), Some(5.0));
    assert_eq!(goal.metric("GAD-7 score").and_then(|m| m.target_value), None);
}
