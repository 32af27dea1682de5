//! Goal, metric and target suggestions for care plans.
//!
//! [`SuggestionService`] is the port; [`MockSuggestionService`] answers
//! from canned clinical defaults after a fixed latency. Requests go through
//! [`SuggestionClient`], which runs each one as a tokio task that can be
//! cancelled while pending.

pub mod client;
pub mod error;
pub mod mock;
pub mod service;

pub use client::{PendingSuggestion, SuggestionClient};
pub use error::{Result, SuggestionError};
pub use mock::MockSuggestionService;
pub use service::{SuggestionService, TargetUpdate};
