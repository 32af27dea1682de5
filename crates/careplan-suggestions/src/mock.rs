//! Canned suggestion backend.

use async_trait::async_trait;
use careplan_core::{Goal, GoalMetric, GoalPatch, GoalSuggestion, SuggestedGoal};
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SuggestionError};
use crate::service::{SuggestionService, TargetUpdate};

/// Default simulated round-trip time.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(800);

/// How far a reached target is tightened, as a fraction of the target.
const TIGHTEN_FACTOR: f64 = 0.05;

// ============================================================================
// Clinical defaults
// ============================================================================

struct MetricDefault {
    name: &'static str,
    unit: &'static str,
    target: f64,
    lower_is_better: bool,
    frequency: &'static str,
}

struct GoalTemplate {
    title: &'static str,
    description: &'static str,
    metrics: &'static [&'static str],
}

struct ConditionProfile {
    keywords: &'static [&'static str],
    condition: &'static str,
    metrics: &'static [MetricDefault],
    goals: &'static [GoalTemplate],
}

const SODIUM_INTAKE: MetricDefault = MetricDefault {
    name: "Sodium intake",
    unit: "mg",
    target: 2000.0,
    lower_is_better: true,
    frequency: "daily",
};

static PROFILES: &[ConditionProfile] = &[
    ConditionProfile {
        keywords: &["diabetes", "t2dm", "e11"],
        condition: "Type 2 diabetes mellitus",
        metrics: &[
            MetricDefault {
                name: "HbA1c",
                unit: "%",
                target: 7.0,
                lower_is_better: true,
                frequency: "quarterly",
            },
            MetricDefault {
                name: "Fasting glucose",
                unit: "mg/dL",
                target: 130.0,
                lower_is_better: true,
                frequency: "daily",
            },
            MetricDefault {
                name: "BMI",
                unit: "kg/m2",
                target: 25.0,
                lower_is_better: true,
                frequency: "monthly",
            },
        ],
        goals: &[
            GoalTemplate {
                title: "Achieve glycemic control",
                description: "Bring HbA1c below 7% within 6 months",
                metrics: &["HbA1c", "Fasting glucose"],
            },
            GoalTemplate {
                title: "Reach a healthy weight",
                description: "Lower BMI through diet and activity",
                metrics: &["BMI"],
            },
        ],
    },
    ConditionProfile {
        keywords: &["hypertension", "high blood pressure", "i10"],
        condition: "Essential hypertension",
        metrics: &[
            MetricDefault {
                name: "Systolic BP",
                unit: "mmHg",
                target: 130.0,
                lower_is_better: true,
                frequency: "daily",
            },
            MetricDefault {
                name: "Diastolic BP",
                unit: "mmHg",
                target: 80.0,
                lower_is_better: true,
                frequency: "daily",
            },
            SODIUM_INTAKE,
        ],
        goals: &[
            GoalTemplate {
                title: "Control blood pressure",
                description: "Maintain blood pressure below 130/80 mmHg",
                metrics: &["Systolic BP", "Diastolic BP"],
            },
            GoalTemplate {
                title: "Reduce sodium intake",
                description: "Keep daily sodium under 2000 mg",
                metrics: &["Sodium intake"],
            },
        ],
    },
    ConditionProfile {
        keywords: &["heart failure", "chf", "hfref", "i50"],
        condition: "Heart failure",
        metrics: &[
            MetricDefault {
                name: "Daily weight change",
                unit: "kg",
                target: 1.0,
                lower_is_better: true,
                frequency: "daily",
            },
            SODIUM_INTAKE,
            MetricDefault {
                name: "6-minute walk distance",
                unit: "m",
                target: 300.0,
                lower_is_better: false,
                frequency: "monthly",
            },
        ],
        goals: &[
            GoalTemplate {
                title: "Prevent fluid overload",
                description: "Detect weight gain early and limit sodium",
                metrics: &["Daily weight change", "Sodium intake"],
            },
            GoalTemplate {
                title: "Improve functional capacity",
                description: "Increase exercise tolerance through cardiac rehab",
                metrics: &["6-minute walk distance"],
            },
        ],
    },
    ConditionProfile {
        keywords: &["copd", "chronic obstructive", "j44"],
        condition: "Chronic obstructive pulmonary disease",
        metrics: &[
            MetricDefault {
                name: "Oxygen saturation",
                unit: "%",
                target: 92.0,
                lower_is_better: false,
                frequency: "daily",
            },
            MetricDefault {
                name: "FEV1",
                unit: "% predicted",
                target: 50.0,
                lower_is_better: false,
                frequency: "quarterly",
            },
            MetricDefault {
                name: "Exacerbations",
                unit: "per year",
                target: 1.0,
                lower_is_better: true,
                frequency: "quarterly",
            },
        ],
        goals: &[
            GoalTemplate {
                title: "Maintain oxygenation",
                description: "Keep resting oxygen saturation at or above 92%",
                metrics: &["Oxygen saturation"],
            },
            GoalTemplate {
                title: "Reduce exacerbations",
                description: "Fewer than two exacerbations per year",
                metrics: &["Exacerbations", "FEV1"],
            },
        ],
    },
    ConditionProfile {
        keywords: &["depression", "depressive", "mdd", "f32", "f33"],
        condition: "Major depressive disorder",
        metrics: &[MetricDefault {
            name: "PHQ-9 score",
            unit: "points",
            target: 5.0,
            lower_is_better: true,
            frequency: "monthly",
        }],
        goals: &[GoalTemplate {
            title: "Achieve remission of depressive symptoms",
            description: "PHQ-9 below 5 sustained over two visits",
            metrics: &["PHQ-9 score"],
        }],
    },
];

/// Profiles matched by the diagnoses, in diagnosis order, each once.
fn profiles_for(diagnoses: &[String]) -> Vec<&'static ConditionProfile> {
    let mut out: Vec<&'static ConditionProfile> = Vec::new();
    for diagnosis in diagnoses {
        let lower = diagnosis.to_lowercase();
        for profile in PROFILES {
            if profile.keywords.iter().any(|k| lower.contains(k))
                && !out.iter().any(|p| std::ptr::eq(*p, profile))
            {
                out.push(profile);
            }
        }
    }
    out
}

fn metric_default(name: &str) -> Option<&'static MetricDefault> {
    PROFILES
        .iter()
        .flat_map(|p| p.metrics.iter())
        .find(|m| m.name.eq_ignore_ascii_case(name))
}

fn to_metric(default: &MetricDefault) -> GoalMetric {
    GoalMetric {
        name: default.name.to_string(),
        unit: Some(default.unit.to_string()),
        target_value: Some(default.target),
        current_value: None,
        frequency: Some(default.frequency.to_string()),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// Service
// ============================================================================

/// Answers from built-in defaults after a fixed latency.
#[derive(Debug, Clone)]
pub struct MockSuggestionService {
    latency: Duration,
    available: bool,
}

impl Default for MockSuggestionService {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY)
    }
}

impl MockSuggestionService {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            available: true,
        }
    }

    /// A service whose every call fails after the latency.
    pub fn unavailable(latency: Duration) -> Self {
        Self {
            latency,
            available: false,
        }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    async fn round_trip(&self, request: &'static str) -> Result<()> {
        debug!(
            request,
            latency_ms = u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX),
            "Mock suggestion request"
        );
        tokio::time::sleep(self.latency).await;
        if self.available {
            Ok(())
        } else {
            Err(SuggestionError::Unavailable(format!(
                "{request}: mock backend is offline"
            )))
        }
    }
}

#[async_trait]
impl SuggestionService for MockSuggestionService {
    async fn suggest_metrics(&self, diagnoses: &[String]) -> Result<Vec<GoalMetric>> {
        self.round_trip("suggest_metrics").await?;

        let mut metrics: Vec<GoalMetric> = Vec::new();
        for profile in profiles_for(diagnoses) {
            for default in profile.metrics {
                if !metrics.iter().any(|m| m.name == default.name) {
                    metrics.push(to_metric(default));
                }
            }
        }
        Ok(metrics)
    }

    async fn suggest_goals(&self, diagnoses: &[String]) -> Result<Vec<GoalSuggestion>> {
        self.round_trip("suggest_goals").await?;

        Ok(profiles_for(diagnoses)
            .into_iter()
            .map(|profile| GoalSuggestion {
                condition: profile.condition.to_string(),
                goals: profile
                    .goals
                    .iter()
                    .map(|template| SuggestedGoal {
                        title: template.title.to_string(),
                        description: Some(template.description.to_string()),
                        metrics: template
                            .metrics
                            .iter()
                            .filter_map(|name| metric_default(name))
                            .map(to_metric)
                            .collect(),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn suggest_target_update(&self, goal: &Goal) -> Result<TargetUpdate> {
        self.round_trip("suggest_target_update").await?;

        let mut patch = GoalPatch::default();
        let mut reasons = Vec::new();

        for metric in &goal.metrics {
            let (Some(target), Some(default)) = (metric.target_value, metric_default(&metric.name))
            else {
                continue;
            };

            let reached = metric.current_value.is_some_and(|current| {
                if default.lower_is_better {
                    current <= target
                } else {
                    current >= target
                }
            });

            let revised = if reached {
                let step = target * TIGHTEN_FACTOR;
                let revised = if default.lower_is_better {
                    target - step
                } else {
                    target + step
                };
                reasons.push(format!(
                    "{} target already reached; tighten to {}",
                    metric.name,
                    round1(revised)
                ));
                round1(revised)
            } else if (target - default.target).abs() > f64::EPSILON {
                reasons.push(format!(
                    "{} target differs from the guideline value of {} {}",
                    metric.name, default.target, default.unit
                ));
                default.target
            } else {
                continue;
            };

            let mut partial = GoalMetric::new(metric.name.clone());
            partial.target_value = Some(revised);
            patch.metrics.push(partial);
        }

        if patch.is_empty() {
            return Err(SuggestionError::NoSuggestion(format!(
                "targets for goal '{}' are already appropriate",
                goal.title
            )));
        }

        Ok(TargetUpdate {
            suggestion: patch,
            rationale: reasons.join("; "),
        })
    }

    async fn suggest_task_targets(&self, goal: &Goal) -> Result<Vec<GoalMetric>> {
        self.round_trip("suggest_task_targets").await?;

        Ok(goal
            .metrics
            .iter()
            .filter(|metric| metric.target_value.is_none())
            .filter_map(|metric| {
                let default = metric_default(&metric.name)?;
                let mut partial = GoalMetric::new(metric.name.clone());
                partial.target_value = Some(default.target);
                if metric.unit.is_none() {
                    partial.unit = Some(default.unit.to_string());
                }
                Some(partial)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnoses(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn service() -> MockSuggestionService {
        MockSuggestionService::new(Duration::from_millis(800))
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_for_multiple_diagnoses_are_unique() {
        let metrics = service()
            .suggest_metrics(&diagnoses(&["Essential hypertension", "CHF, chronic"]))
            .await
            .unwrap();

        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Systolic BP",
                "Diastolic BP",
                "Sodium intake",
                "Daily weight change",
                "6-minute walk distance"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_diagnosis_yields_nothing() {
        let goals = service()
            .suggest_goals(&diagnoses(&["Seasonal allergies"]))
            .await
            .unwrap();
        assert!(goals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_goals_grouped_by_condition() {
        let goals = service()
            .suggest_goals(&diagnoses(&["Type 2 Diabetes", "Major depression"]))
            .await
            .unwrap();

        assert_eq!(goals.len(), 2);
        assert_eq!(goals[0].condition, "Type 2 diabetes mellitus");
        assert_eq!(goals[0].goals[0].metrics[0].name, "HbA1c");
        assert_eq!(goals[1].condition, "Major depressive disorder");
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_update_tightens_reached_target() {
        let mut goal = Goal::new("Glycemic control");
        let mut hba1c = GoalMetric::new("HbA1c");
        hba1c.target_value = Some(8.0);
        hba1c.current_value = Some(7.5);
        goal.upsert_metric(hba1c);

        let update = service().suggest_target_update(&goal).await.unwrap();
        assert_eq!(update.suggestion.metrics[0].target_value, Some(7.6));
        assert!(update.rationale.contains("HbA1c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_update_aligns_with_guideline() {
        let mut goal = Goal::new("Blood pressure");
        let mut systolic = GoalMetric::new("Systolic BP");
        systolic.target_value = Some(140.0);
        systolic.current_value = Some(150.0);
        goal.upsert_metric(systolic);

        let update = service().suggest_target_update(&goal).await.unwrap();
        assert_eq!(update.suggestion.metrics[0].target_value, Some(130.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_update_without_changes_is_no_suggestion() {
        let goal = Goal::new("Empty goal");
        let err = service().suggest_target_update(&goal).await.unwrap_err();
        assert!(matches!(err, SuggestionError::NoSuggestion(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_targets_fill_missing_only() {
        let mut goal = Goal::new("COPD");
        goal.upsert_metric(GoalMetric::new("Oxygen saturation"));
        let mut fev1 = GoalMetric::new("FEV1");
        fev1.target_value = Some(60.0);
        goal.upsert_metric(fev1);
        goal.upsert_metric(GoalMetric::new("Steps"));

        let targets = service().suggest_task_targets(&goal).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "Oxygen saturation");
        assert_eq!(targets[0].target_value, Some(92.0));
        assert_eq!(targets[0].unit.as_deref(), Some("%"));
    }

    #[test]
    fn test_zero_latency_blocking_call() {
        let service = MockSuggestionService::new(Duration::ZERO);
        let metrics = tokio_test::block_on(service.suggest_metrics(&diagnoses(&["Diabetes"]))).unwrap();
        assert_eq!(metrics.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_backend() {
        let err = MockSuggestionService::unavailable(Duration::from_millis(10))
            .suggest_metrics(&diagnoses(&["COPD"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SuggestionError::Unavailable(_)));
    }
}
