pub mod bulk;
pub mod duration;
pub mod error;
pub mod flow;
pub mod id;
pub mod model;
pub mod quality;
pub mod schedule;
pub mod time;
pub mod triggers;

pub use bulk::BulkTaskUpdate;
pub use duration::{DurationSpec, TimeUnit};
pub use error::{CoreError, ErrorCategory, Result};
pub use flow::{
    ConditionDetails, CreateTaskDetails, FlowTrigger, MessageChannel, ReactiveAction, ReactiveFlow,
    SendMessageDetails, TriggerWorkflowDetails,
};
pub use id::{IdError, generate_id, validate_id};
pub use model::{
    Barrier, CarePlan, Comparator, DataTableEntry, EducationItem, EventTask, ExtraValue, Goal,
    GoalMetric, GoalPatch, GoalStatus, GoalSuggestion, Instruction, MeasurementTarget,
    SuggestedGoal, Task, TaskPriority, TaskStatus,
};
pub use quality::{QualityMeasure, QualityMeasureCatalog, QualityProgram, SuggestedTask};
pub use schedule::{TaskSchedule, next_occurrences};
pub use time::{DayOfWeek, TimeOfDay, now_utc};
pub use triggers::{
    DueDatePolicy, DueDatePolicyType, StartWindow, TaskTriggerEvent, TriggerCatalog,
    TriggerConfig, TriggerDetails, TriggerEvent,
};
