//! Hysteresis state machine over per-entity status records.
//!
//! Degradations are always accepted. Recoveries must wait until the current
//! category has been held for its minimum dwell time, so a line hovering
//! around a threshold does not flap between alerts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::{Category, DbError, EntityId, StatusRecord, StatusStore};

/// Dwell times and fix-time estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Minimum time a RED status is held before recovering (default: 10 min)
    pub red_dwell: Duration,
    /// Minimum time a YELLOW status is held before recovering (default: 5 min)
    pub yellow_dwell: Duration,
    /// Estimated hours to fix a YELLOW fault (default: 2)
    pub yellow_fix_hours: f64,
    /// Estimated hours to fix a RED fault (default: 4)
    pub red_fix_hours: f64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            red_dwell: Duration::from_secs(600),
            yellow_dwell: Duration::from_secs(300),
            yellow_fix_hours: 2.0,
            red_fix_hours: 4.0,
        }
    }
}

impl StatusConfig {
    pub fn min_dwell(&self, category: Category) -> Duration {
        match category {
            Category::Red => self.red_dwell,
            Category::Yellow => self.yellow_dwell,
            Category::Green => Duration::ZERO,
        }
    }

    /// Default fix estimate for a category; GREEN has none.
    pub fn default_fix_hours(&self, category: Category) -> Option<f64> {
        match category {
            Category::Red => Some(self.red_fix_hours),
            Category::Yellow => Some(self.yellow_fix_hours),
            Category::Green => None,
        }
    }
}

/// Direction of a category change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Degradation,
    Recovery,
    None,
}

impl Transition {
    pub fn classify(from: Category, to: Category) -> Self {
        use std::cmp::Ordering;
        match to.cmp(&from) {
            Ordering::Greater => Transition::Degradation,
            Ordering::Less => Transition::Recovery,
            Ordering::Equal => Transition::None,
        }
    }
}

/// Answer to "may this entity move to that category now?".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Permission {
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

impl Permission {
    fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
            remaining_seconds: None,
        }
    }
}

/// Decide whether `record` may move to `proposed` at `now`.
pub fn evaluate_permission(
    record: &StatusRecord,
    proposed: Category,
    now: DateTime<Utc>,
    config: &StatusConfig,
) -> Permission {
    let current = record.current_category;
    match Transition::classify(current, proposed) {
        Transition::None => Permission::allow("no change"),
        Transition::Degradation => Permission::allow("degradation is always allowed"),
        Transition::Recovery => {
            let dwell_ms = config.min_dwell(current).as_millis() as i64;
            let held_ms = (now - record.status_changed_at).num_milliseconds();
            if held_ms > dwell_ms {
                Permission::allow("minimum dwell elapsed")
            } else {
                let remaining_ms = dwell_ms - held_ms;
                let remaining_seconds = ((remaining_ms + 999) / 1000).max(1) as u64;
                Permission {
                    allowed: false,
                    reason: format!(
                        "{} must hold for {}s before recovering",
                        current,
                        dwell_ms / 1000
                    ),
                    remaining_seconds: Some(remaining_seconds),
                }
            }
        }
    }
}

/// Result of asking the state machine to move an entity.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    /// The record after the update; its category is what callers present.
    pub record: StatusRecord,
    pub proposed: Category,
    /// The accepted change, `None` when blocked or unchanged.
    pub transition: Transition,
    pub permission: Permission,
}

/// Sole writer of status records.
pub struct StatusStateMachine {
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    config: StatusConfig,
}

impl StatusStateMachine {
    pub fn new(store: Arc<dyn StatusStore>, clock: Arc<dyn Clock>, config: StatusConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current record, creating a GREEN one on first observation.
    pub fn current(&self, entity_id: EntityId) -> Result<StatusRecord, DbError> {
        if let Some(record) = self.store.get_status(entity_id)? {
            return Ok(record);
        }
        let record = StatusRecord::new(entity_id, self.clock.now());
        self.store.upsert_status(&record)?;
        tracing::debug!("Created status record for entity {}", entity_id);
        Ok(record)
    }

    pub fn should_allow(&self, entity_id: EntityId, proposed: Category) -> Result<Permission, DbError> {
        let record = self.current(entity_id)?;
        Ok(evaluate_permission(&record, proposed, self.clock.now(), &self.config))
    }

    /// Apply a proposed category, subject to hysteresis.
    pub fn update(
        &self,
        entity_id: EntityId,
        proposed: Category,
        fault_type: Option<&str>,
        fix_hours: Option<f64>,
    ) -> Result<TransitionOutcome, DbError> {
        let mut record = self.current(entity_id)?;
        let now = self.clock.now();
        let permission = evaluate_permission(&record, proposed, now, &self.config);
        record.last_checked_at = now;

        let transition = if permission.allowed {
            Transition::classify(record.current_category, proposed)
        } else {
            Transition::None
        };

        if transition != Transition::None {
            tracing::info!(
                "Entity {} status {} -> {}",
                entity_id,
                record.current_category,
                proposed
            );
            record.previous_category = Some(record.current_category);
            record.current_category = proposed;
            record.status_changed_at = now;
            record.notified = false;
            record.fault_type = match proposed {
                Category::Green => None,
                _ => fault_type.map(str::to_string),
            };
            record.estimated_fix_time = fix_hours
                .or_else(|| self.config.default_fix_hours(proposed))
                .filter(|_| proposed != Category::Green)
                .map(|hours| now + chrono::Duration::milliseconds((hours * 3_600_000.0) as i64));
        } else if !permission.allowed {
            tracing::debug!(
                "Entity {} held at {}: {} ({:?}s left)",
                entity_id,
                record.current_category,
                permission.reason,
                permission.remaining_seconds
            );
        }

        self.store.upsert_status(&record)?;

        Ok(TransitionOutcome {
            record,
            proposed,
            transition,
            permission,
        })
    }

    /// Record a successful alert delivery.
    pub fn mark_notified(&self, record: &mut StatusRecord) -> Result<(), DbError> {
        record.notified = true;
        record.notified_at = Some(self.clock.now());
        self.store.upsert_status(record)
    }

    /// Force every record back to GREEN.
    pub fn reset_all(&self) -> Result<usize, DbError> {
        let count = self.store.reset_statuses(self.clock.now())?;
        tracing::info!("Reset {} status records to GREEN", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::Store;
    use tempfile::NamedTempFile;

    struct Fixture {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        clock: Arc<ManualClock>,
        machine: StatusStateMachine,
    }

    fn fixture() -> Fixture {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let machine = StatusStateMachine::new(store.clone(), clock.clone(), StatusConfig::default());
        Fixture {
            _tmp: tmp,
            store,
            clock,
            machine,
        }
    }

    #[test]
    fn test_transition_classification() {
        use Category::*;
        for (from, to) in [(Green, Yellow), (Green, Red), (Yellow, Red)] {
            assert_eq!(Transition::classify(from, to), Transition::Degradation);
        }
        for (from, to) in [(Red, Yellow), (Red, Green), (Yellow, Green)] {
            assert_eq!(Transition::classify(from, to), Transition::Recovery);
        }
        for c in Category::ALL {
            assert_eq!(Transition::classify(c, c), Transition::None);
        }
    }

    #[test]
    fn test_first_observation_creates_green_record() {
        let f = fixture();
        assert!(f.store.get_status(1).unwrap().is_none());
        let record = f.machine.current(1).unwrap();
        assert_eq!(record.current_category, Category::Green);
        assert!(f.store.get_status(1).unwrap().is_some());
    }

    #[test]
    fn test_red_dwell_boundaries() {
        let f = fixture();
        let outcome = f.machine.update(1, Category::Red, Some("packet_loss"), None).unwrap();
        assert_eq!(outcome.transition, Transition::Degradation);

        f.clock.advance(chrono::Duration::minutes(9));
        let permission = f.machine.should_allow(1, Category::Green).unwrap();
        assert!(!permission.allowed);
        assert_eq!(permission.remaining_seconds, Some(60));

        f.clock.advance(chrono::Duration::minutes(1));
        let permission = f.machine.should_allow(1, Category::Green).unwrap();
        assert!(!permission.allowed);
        assert_eq!(permission.remaining_seconds, Some(1));

        f.clock.advance(chrono::Duration::seconds(1));
        assert!(f.machine.should_allow(1, Category::Green).unwrap().allowed);
    }

    #[test]
    fn test_yellow_dwell_is_shorter() {
        let f = fixture();
        f.machine.update(1, Category::Yellow, None, None).unwrap();
        f.clock.advance(chrono::Duration::minutes(4));
        assert!(!f.machine.should_allow(1, Category::Green).unwrap().allowed);
        f.clock.advance(chrono::Duration::seconds(61));
        assert!(f.machine.should_allow(1, Category::Green).unwrap().allowed);
    }

    #[test]
    fn test_degradation_never_blocked() {
        let f = fixture();
        f.machine.update(1, Category::Yellow, None, None).unwrap();
        let outcome = f.machine.update(1, Category::Red, None, None).unwrap();
        assert_ne!(outcome.transition, Transition::None);
        assert_eq!(outcome.record.current_category, Category::Red);
        assert_eq!(outcome.record.previous_category, Some(Category::Yellow));
    }

    #[test]
    fn test_blocked_recovery_only_refreshes_last_checked() {
        let f = fixture();
        let before = f.machine.update(1, Category::Red, Some("line_fault"), None).unwrap().record;
        f.clock.advance(chrono::Duration::minutes(3));

        let outcome = f.machine.update(1, Category::Green, None, None).unwrap();
        assert!(!outcome.permission.allowed);
        assert_eq!(outcome.transition, Transition::None);
        assert_eq!(outcome.record.current_category, Category::Red);
        assert_eq!(outcome.record.status_changed_at, before.status_changed_at);
        assert_eq!(outcome.record.fault_type.as_deref(), Some("line_fault"));
        assert!(outcome.record.last_checked_at > before.last_checked_at);
        assert_eq!(f.store.get_status(1).unwrap().unwrap(), outcome.record);
    }

    #[test]
    fn test_allowed_change_sets_fields() {
        let f = fixture();
        let start = f.clock.now();
        let record = f.machine.update(1, Category::Red, Some("ping_high"), None).unwrap().record;
        assert_eq!(record.previous_category, Some(Category::Green));
        assert_eq!(record.status_changed_at, start);
        assert!(!record.notified);
        assert_eq!(record.fault_type.as_deref(), Some("ping_high"));
        assert_eq!(record.estimated_fix_time, Some(start + chrono::Duration::hours(4)));

        f.clock.advance(chrono::Duration::minutes(11));
        let record = f.machine.update(1, Category::Yellow, None, Some(1.5)).unwrap().record;
        assert_eq!(
            record.estimated_fix_time,
            Some(f.clock.now() + chrono::Duration::minutes(90))
        );

        f.clock.advance(chrono::Duration::minutes(6));
        let record = f.machine.update(1, Category::Green, None, None).unwrap().record;
        assert!(record.estimated_fix_time.is_none());
        assert!(record.fault_type.is_none());
    }

    #[test]
    fn test_no_op_update_is_idempotent() {
        let f = fixture();
        let first = f.machine.update(1, Category::Yellow, Some("ping_high"), None).unwrap().record;
        f.clock.advance(chrono::Duration::seconds(30));
        let outcome = f.machine.update(1, Category::Yellow, Some("packet_loss"), None).unwrap();
        assert_eq!(outcome.transition, Transition::None);
        assert!(outcome.permission.allowed);

        let mut expected = first.clone();
        expected.last_checked_at = f.clock.now();
        assert_eq!(outcome.record, expected);
    }

    #[test]
    fn test_mark_notified_and_reset() {
        let f = fixture();
        let mut record = f.machine.update(1, Category::Red, None, None).unwrap().record;
        f.machine.mark_notified(&mut record).unwrap();
        let stored = f.store.get_status(1).unwrap().unwrap();
        assert!(stored.notified);
        assert_eq!(stored.notified_at, Some(f.clock.now()));

        f.machine.update(2, Category::Yellow, None, None).unwrap();
        assert_eq!(f.machine.reset_all().unwrap(), 2);
        for id in [1, 2] {
            let record = f.store.get_status(id).unwrap().unwrap();
            assert_eq!(record.current_category, Category::Green);
            assert!(record.previous_category.is_none());
            assert!(!record.notified);
        }
    }
}
