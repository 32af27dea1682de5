pub mod dedup;
pub mod delay;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod expression;
pub mod notify;
pub mod registry;
pub mod workflow;

pub use dedup::{DedupKey, DedupLedger};
pub use delay::{Continuation, DelayDriver, DelayQueue, EngineState, SharedState, shutdown};
pub use engine::{ReactiveEngine, TASK_COMPLETED};
pub use error::{ErrorKind, EvaluationError, Result};
pub use evaluator::{
    ActionEffect, ActionEvaluator, ActionOutcome, DEFAULT_MAX_CONDITION_DEPTH, EvaluatorConfig,
    FiringContext, FlowReport, FlowStatus,
};
pub use expression::{CompareOp, Expression, Literal, LogicalOp, parse_expression};
pub use notify::{MessageRenderer, NotificationDispatcher, OutboundMessage, RecordingDispatcher};
pub use registry::{FlowOwner, FlowRegistry, RegisteredFlow};
pub use workflow::{RecordingLauncher, WorkflowLauncher, WorkflowRequest};
