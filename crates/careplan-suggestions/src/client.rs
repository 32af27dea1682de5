//! Cancellable suggestion requests.

use careplan_core::{Goal, GoalMetric, GoalSuggestion};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SuggestionError};
use crate::service::{SuggestionService, TargetUpdate};

/// Default overall deadline for one request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A suggestion request running in the background.
///
/// Yields the whole answer or an error, never a partial result.
pub struct PendingSuggestion<T> {
    request: &'static str,
    handle: JoinHandle<Result<T>>,
    timeout: Duration,
}

impl<T> PendingSuggestion<T> {
    pub fn request(&self) -> &'static str {
        self.request
    }

    /// Abandon the request. A later [`wait`](Self::wait) yields `Cancelled`.
    pub fn cancel(&self) {
        debug!(request = self.request, "Cancelling suggestion request");
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Wait for the answer, up to the client's timeout.
    pub async fn wait(mut self) -> Result<T> {
        match tokio::time::timeout(self.timeout, &mut self.handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_cancelled() => Err(SuggestionError::Cancelled {
                request: self.request,
            }),
            Ok(Err(e)) => {
                warn!(request = self.request, error = %e, "Suggestion task failed");
                Err(SuggestionError::Unavailable(e.to_string()))
            }
            Err(_) => {
                self.handle.abort();
                warn!(
                    request = self.request,
                    timeout_ms = self.timeout_ms(),
                    "Suggestion request timed out"
                );
                Err(SuggestionError::TimedOut {
                    request: self.request,
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }
}

/// Dropping an unfinished request aborts it.
impl<T> Drop for PendingSuggestion<T> {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!(request = self.request, "Dropping unfinished suggestion request");
            self.handle.abort();
        }
    }
}

/// Issues requests against a [`SuggestionService`] as tokio tasks.
#[derive(Clone)]
pub struct SuggestionClient {
    service: Arc<dyn SuggestionService>,
    timeout: Duration,
}

impl SuggestionClient {
    pub fn new(service: Arc<dyn SuggestionService>) -> Self {
        Self {
            service,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn pending<T>(&self, request: &'static str, handle: JoinHandle<Result<T>>) -> PendingSuggestion<T> {
        PendingSuggestion {
            request,
            handle,
            timeout: self.timeout,
        }
    }

    pub fn spawn_metrics(&self, diagnoses: Vec<String>) -> PendingSuggestion<Vec<GoalMetric>> {
        let service = self.service.clone();
        let handle = tokio::spawn(async move { service.suggest_metrics(&diagnoses).await });
        self.pending("suggest_metrics", handle)
    }

    pub fn spawn_goals(&self, diagnoses: Vec<String>) -> PendingSuggestion<Vec<GoalSuggestion>> {
        let service = self.service.clone();
        let handle = tokio::spawn(async move { service.suggest_goals(&diagnoses).await });
        self.pending("suggest_goals", handle)
    }

    /// `goal` is a snapshot; later edits to the plan are not seen.
    pub fn spawn_target_update(&self, goal: Goal) -> PendingSuggestion<TargetUpdate> {
        let service = self.service.clone();
        let handle = tokio::spawn(async move { service.suggest_target_update(&goal).await });
        self.pending("suggest_target_update", handle)
    }

    pub fn spawn_task_targets(&self, goal: Goal) -> PendingSuggestion<Vec<GoalMetric>> {
        let service = self.service.clone();
        let handle = tokio::spawn(async move { service.suggest_task_targets(&goal).await });
        self.pending("suggest_task_targets", handle)
    }
}
