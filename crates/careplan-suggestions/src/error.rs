use thiserror::Error;

#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("Suggestion request '{request}' was cancelled")]
    Cancelled { request: &'static str },

    #[error("Suggestion request '{request}' timed out after {timeout_ms}ms")]
    TimedOut { request: &'static str, timeout_ms: u64 },

    #[error("Suggestion service unavailable: {0}")]
    Unavailable(String),

    #[error("No suggestion: {0}")]
    NoSuggestion(String),
}

pub type Result<T> = std::result::Result<T, SuggestionError>;
