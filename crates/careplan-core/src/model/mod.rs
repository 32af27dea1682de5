//! Care-plan aggregate: plan, goals and their tasks.

mod care_plan;
mod goal;
mod task;

pub use care_plan::{Barrier, CarePlan, EducationItem, GoalSuggestion, Instruction, SuggestedGoal};
pub use goal::{
    Comparator, DataTableEntry, EventTask, Goal, GoalMetric, GoalPatch, GoalStatus,
    MeasurementTarget,
};
pub use task::{ExtraValue, Task, TaskPriority, TaskStatus};
