//! Ledger of triggered task creations for deduplication windows.

use careplan_core::{DurationSpec, Result};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Identity of one triggered task creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub goal_id: String,
    /// `templateId`, else the flow's `sourceTemplateId`, else `flow#path`
    pub template: String,
    /// Firing-context identity, defaulting to the trigger id
    pub instance: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    fired_at: OffsetDateTime,
    /// End of the window the entry was recorded under
    expires: OffsetDateTime,
    task_id: String,
}

#[derive(Debug, Default)]
pub struct DedupLedger {
    entries: HashMap<DedupKey, Entry>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task created for `key` within `window` before `fired_at`, if any.
    pub fn recent(
        &self,
        key: &DedupKey,
        fired_at: OffsetDateTime,
        window: DurationSpec,
    ) -> Result<Option<&str>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        let expires = window.after(entry.fired_at)?;
        if fired_at >= entry.fired_at && fired_at < expires {
            Ok(Some(entry.task_id.as_str()))
        } else {
            Ok(None)
        }
    }

    pub fn record(
        &mut self,
        key: DedupKey,
        fired_at: OffsetDateTime,
        window: DurationSpec,
        task_id: impl Into<String>,
    ) -> Result<()> {
        let expires = window.after(fired_at)?;
        self.entries.insert(
            key,
            Entry {
                fired_at,
                expires,
                task_id: task_id.into(),
            },
        );
        Ok(())
    }

    pub fn forget(&mut self, key: &DedupKey) {
        self.entries.remove(key);
    }

    pub fn forget_goal(&mut self, goal_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.goal_id != goal_id);
        before - self.entries.len()
    }

    /// Drop entries whose window has closed by `now`.
    pub fn prune_expired(&mut self, now: OffsetDateTime) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn key() -> DedupKey {
        DedupKey {
            goal_id: "g1".into(),
            template: "T1".into(),
            instance: "observation_out_of_range".into(),
        }
    }

    #[test]
    fn test_recent_within_window() {
        let mut ledger = DedupLedger::new();
        let first = datetime!(2024-06-01 00:00:00 UTC);
        let window = DurationSpec::hours(24);
        ledger.record(key(), first, window, "task-1").unwrap();

        assert_eq!(
            ledger.recent(&key(), datetime!(2024-06-01 12:00:00 UTC), window).unwrap(),
            Some("task-1")
        );
        assert_eq!(
            ledger.recent(&key(), datetime!(2024-06-02 00:00:00 UTC), window).unwrap(),
            None
        );
    }

    #[test]
    fn test_other_instance_is_not_a_duplicate() {
        let mut ledger = DedupLedger::new();
        ledger
            .record(key(), datetime!(2024-06-01 00:00:00 UTC), DurationSpec::days(1), "task-1")
            .unwrap();
        let other = DedupKey {
            instance: "obs-42".into(),
            ..key()
        };
        assert_eq!(
            ledger
                .recent(&other, datetime!(2024-06-01 00:05:00 UTC), DurationSpec::days(1))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_forget_and_prune() {
        let mut ledger = DedupLedger::new();
        ledger
            .record(key(), datetime!(2024-06-01 00:00:00 UTC), DurationSpec::hours(12), "task-1")
            .unwrap();
        ledger
            .record(
                DedupKey {
                    goal_id: "g2".into(),
                    ..key()
                },
                datetime!(2024-06-01 00:00:00 UTC),
                DurationSpec::days(7),
                "task-2",
            )
            .unwrap();
        assert_eq!(ledger.prune_expired(datetime!(2024-06-01 11:59:00 UTC)), 0);
        assert_eq!(ledger.prune_expired(datetime!(2024-06-01 12:00:00 UTC)), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.forget_goal("g2"), 1);
        assert!(ledger.is_empty());
    }
}
