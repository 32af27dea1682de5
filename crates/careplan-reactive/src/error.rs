use careplan_core::CoreError;
use std::fmt;
use thiserror::Error;

/// Failure of one action while evaluating a flow.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Unknown trigger: {0}")]
    UnknownTrigger(String),

    #[error("Unknown action type '{action_type}' at {path}")]
    UnknownActionType { action_type: String, path: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid action details at {path}: {message}")]
    InvalidAction { path: String, message: String },

    #[error("Invalid expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("Expression references missing field '{path}'")]
    MissingField { path: String },

    #[error("Condition nesting depth {depth} exceeds limit {limit}")]
    DepthExceeded { depth: usize, limit: usize },

    #[error("{collaborator} rejected hand-off: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EvaluationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_action(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAction {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(path: impl Into<String>) -> Self {
        Self::MissingField { path: path.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTrigger(_)
            | Self::UnknownActionType { .. }
            | Self::Configuration { .. }
            | Self::Collaborator { .. } => ErrorKind::Configuration,
            Self::InvalidAction { .. }
            | Self::InvalidExpression { .. }
            | Self::MissingField { .. }
            | Self::Core(_) => ErrorKind::Validation,
            Self::DepthExceeded { .. } => ErrorKind::Structure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown trigger or action type, or a flow wired to nothing
    Configuration,
    /// Malformed action details or an unevaluable condition
    Validation,
    /// Nesting beyond the configured limit
    Structure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Structure => write!(f, "structure"),
        }
    }
}

pub type Result<T> = std::result::Result<T, EvaluationError>;
