//! Suspended flows and the driver that resumes them.

use careplan_core::{CarePlan, ReactiveFlow, now_utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::engine::ReactiveEngine;
use crate::evaluator::{FiringContext, FlowReport, SavedFrame};
use crate::registry::FlowOwner;

/// A flow parked by a `Delay` action, resumable after `resume_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    pub id: u64,
    pub flow: ReactiveFlow,
    pub owner: FlowOwner,
    pub ctx: FiringContext,
    pub resume_at: OffsetDateTime,
    pub(crate) frames: Vec<SavedFrame>,
}

impl Continuation {
    fn belongs_to_goal(&self, goal_id: &str) -> bool {
        self.owner.goal_id.as_deref() == Some(goal_id) || self.ctx.goal_id.as_deref() == Some(goal_id)
    }

    fn belongs_to_task(&self, task_id: &str) -> bool {
        self.owner.task_id.as_deref() == Some(task_id) || self.ctx.task_id.as_deref() == Some(task_id)
    }
}

/// Pending continuations.
#[derive(Debug, Default)]
pub struct DelayQueue {
    pending: Vec<Continuation>,
    next_id: u64,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn park(
        &mut self,
        flow: ReactiveFlow,
        owner: FlowOwner,
        ctx: FiringContext,
        frames: Vec<SavedFrame>,
        resume_at: OffsetDateTime,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.pending.push(Continuation {
            id,
            flow,
            owner,
            ctx,
            resume_at,
            frames,
        });
        id
    }

    /// Remove and return continuations due at `now`, earliest first.
    pub fn take_due(&mut self, now: OffsetDateTime) -> Vec<Continuation> {
        let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|c| c.resume_at <= now);
        self.pending = rest;
        due.sort_by(|a, b| a.resume_at.cmp(&b.resume_at).then(a.id.cmp(&b.id)));
        due
    }

    pub fn cancel(&mut self, id: u64) -> Option<Continuation> {
        let index = self.pending.iter().position(|c| c.id == id)?;
        Some(self.pending.remove(index))
    }

    pub fn cancel_for_goal(&mut self, goal_id: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|c| !c.belongs_to_goal(goal_id));
        before - self.pending.len()
    }

    pub fn cancel_for_task(&mut self, task_id: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|c| !c.belongs_to_task(task_id));
        before - self.pending.len()
    }

    pub fn get(&self, id: u64) -> Option<&Continuation> {
        self.pending.iter().find(|c| c.id == id)
    }

    /// Earliest pending resume time.
    pub fn next_due(&self) -> Option<OffsetDateTime> {
        self.pending.iter().map(|c| c.resume_at).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Engine and the care plan it acts on, shared with the delay driver.
pub struct EngineState {
    pub engine: ReactiveEngine,
    pub plan: CarePlan,
}

pub type SharedState = Arc<Mutex<EngineState>>;

/// Background task that resumes delayed flows once they are due.
pub struct DelayDriver {
    state: SharedState,
    poll_interval: Duration,
    reports: Option<mpsc::UnboundedSender<FlowReport>>,
}

impl DelayDriver {
    pub fn new(state: SharedState, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
            reports: None,
        }
    }

    /// Forward every report produced by a resumed flow.
    pub fn with_reports(mut self, sender: mpsc::UnboundedSender<FlowReport>) -> Self {
        self.reports = Some(sender);
        self
    }

    /// Resume everything due at `now`. Returns how many flows ran.
    pub fn tick(&self, now: OffsetDateTime) -> usize {
        let reports = {
            let mut guard = self.state.lock();
            let EngineState { engine, plan } = &mut *guard;
            engine.resume_due(plan, now)
        };

        let count = reports.len();
        for report in reports {
            if let Some(sender) = &self.reports
                && sender.send(report).is_err()
            {
                debug!("Report receiver dropped");
            }
        }
        count
    }

    /// Start the driver. Send `true` on the returned channel to stop it.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
                "Delay driver started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let resumed = self.tick(now_utc());
                        if resumed > 0 {
                            debug!(resumed, "Resumed delayed flows");
                        }
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            info!("Delay driver shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

/// Stop a driver started with [`DelayDriver::start`].
pub fn shutdown(handle: &watch::Sender<bool>) {
    if handle.send(true).is_err() {
        warn!("Delay driver already stopped");
    }
}
