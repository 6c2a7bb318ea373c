//! Alert policy and delivery.
//!
//! [`NotificationTrigger`] decides whether an accepted transition deserves
//! an alert and hands the composed message to a [`Notifier`].

mod compose;
mod webhook;

pub use compose::*;
pub use webhook::*;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::NotifierKind;
use crate::db::{Category, Entity, EntityId, StatusRecord};
use crate::fusion::FusionResult;
use crate::status::{StatusStateMachine, Transition};

/// Notification delivery errors.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("notifier misconfigured: {0}")]
    Config(String),
}

/// Delivers an alert message for one entity.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, entity_id: EntityId, message: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, entity_id: EntityId, message: &str) -> Result<(), NotifyError> {
        tracing::info!("Alert for entity {}: {}", entity_id, message);
        Ok(())
    }
}

/// Build the configured notifier.
pub fn build_notifier(kind: &NotifierKind) -> Result<Arc<dyn Notifier>, NotifyError> {
    Ok(match kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Webhook { url } => Arc::new(WebhookNotifier::new(url)?),
        NotifierKind::Telegram { token, chat_id } => Arc::new(TelegramNotifier::new(token, chat_id)?),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

/// Alert severity for a `from -> to` transition, or `None` when it is not alert-worthy.
pub fn decide(from: Category, to: Category) -> Option<Severity> {
    match Transition::classify(from, to) {
        Transition::Degradation if to == Category::Red => Some(Severity::Critical),
        Transition::Degradation => Some(Severity::Warning),
        Transition::Recovery if to == Category::Green => Some(Severity::Info),
        Transition::Recovery | Transition::None => None,
    }
}

/// What the trigger did for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationOutcome {
    NotRequired,
    AlreadySent,
    Sent { severity: Severity },
    Failed { severity: Severity, reason: String },
}

/// Facts about the evaluation an alert message is built from.
pub struct AlertContext<'a> {
    pub entity: &'a Entity,
    pub fusion: &'a FusionResult,
    /// Class code of the dominant verdict, used to name the likely cause.
    pub class_code: u8,
}

pub struct NotificationTrigger {
    notifier: Arc<dyn Notifier>,
    composer: MessageComposer,
}

impl NotificationTrigger {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            composer: MessageComposer,
        }
    }

    /// Send an alert for the record's last accepted transition if it
    /// qualifies and has not been delivered yet.
    ///
    /// A failed delivery leaves `notified` false so the next evaluation of
    /// the entity tries again.
    pub async fn process(
        &self,
        machine: &StatusStateMachine,
        record: &mut StatusRecord,
        context: &AlertContext<'_>,
    ) -> NotificationOutcome {
        let Some(previous) = record.previous_category else {
            return NotificationOutcome::NotRequired;
        };
        let Some(severity) = decide(previous, record.current_category) else {
            return NotificationOutcome::NotRequired;
        };
        if record.notified {
            return NotificationOutcome::AlreadySent;
        }

        let message = self.composer.compose(record, severity, context);
        match self.notifier.send(record.entity_id, &message).await {
            Ok(()) => {
                if let Err(e) = machine.mark_notified(record) {
                    tracing::error!(
                        "Alert sent for entity {} but notified flag not stored: {}",
                        record.entity_id,
                        e
                    );
                }
                tracing::info!(
                    "{} alert sent for entity {} via {}",
                    severity.as_str(),
                    record.entity_id,
                    self.notifier.name()
                );
                NotificationOutcome::Sent { severity }
            }
            Err(e) => {
                tracing::warn!(
                    "Alert delivery for entity {} via {} failed, will retry: {}",
                    record.entity_id,
                    self.notifier.name(),
                    e
                );
                NotificationOutcome::Failed {
                    severity,
                    reason: e.to_string(),
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{StatusStore, Store};
    use crate::fusion::Signal;
    use crate::status::StatusConfig;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn fusion(category: Category) -> FusionResult {
        FusionResult {
            risk_score: 0.9,
            category,
            rationale: "test".to_string(),
            dominant: Signal::Snapshot,
            degraded: false,
        }
    }

    #[test]
    fn test_decision_matrix() {
        use Category::*;
        assert_eq!(decide(Green, Yellow), Some(Severity::Warning));
        assert_eq!(decide(Green, Red), Some(Severity::Critical));
        assert_eq!(decide(Yellow, Red), Some(Severity::Critical));
        assert_eq!(decide(Red, Green), Some(Severity::Info));
        assert_eq!(decide(Yellow, Green), Some(Severity::Info));
        assert_eq!(decide(Red, Yellow), None);
        for c in Category::ALL {
            assert_eq!(decide(c, c), None);
        }
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried_once_it_succeeds() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let machine = StatusStateMachine::new(store.clone(), clock.clone(), StatusConfig::default());
        let notifier = Arc::new(RecordingNotifier::failing());
        let trigger = NotificationTrigger::new(notifier.clone());

        let entity = Entity {
            id: 1,
            name: "Subscriber 0001".to_string(),
            ..Entity::default()
        };
        let fused = fusion(Category::Red);
        let context = AlertContext {
            entity: &entity,
            fusion: &fused,
            class_code: 3,
        };

        let mut record = machine.update(1, Category::Red, Some("packet_loss"), None).unwrap().record;
        let outcome = trigger.process(&machine, &mut record, &context).await;
        assert!(matches!(outcome, NotificationOutcome::Failed { severity: Severity::Critical, .. }));
        assert!(!store.get_status(1).unwrap().unwrap().notified);

        // Next cycle: category unchanged, delivery now works.
        notifier.set_failing(false);
        let mut record = machine.update(1, Category::Red, None, None).unwrap().record;
        let outcome = trigger.process(&machine, &mut record, &context).await;
        assert_eq!(outcome, NotificationOutcome::Sent { severity: Severity::Critical });
        assert_eq!(notifier.count(), 1);
        assert!(store.get_status(1).unwrap().unwrap().notified);

        // Already delivered: never re-sent.
        let mut record = machine.update(1, Category::Red, None, None).unwrap().record;
        let outcome = trigger.process(&machine, &mut record, &context).await;
        assert_eq!(outcome, NotificationOutcome::AlreadySent);
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_non_qualifying_transitions_are_silent() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let machine = StatusStateMachine::new(store, clock.clone(), StatusConfig::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let trigger = NotificationTrigger::new(notifier.clone());

        let entity = Entity {
            id: 1,
            ..Entity::default()
        };
        let fused = fusion(Category::Yellow);
        let context = AlertContext {
            entity: &entity,
            fusion: &fused,
            class_code: 1,
        };

        // Fresh record: nothing to announce.
        let mut record = machine.current(1).unwrap();
        assert_eq!(
            trigger.process(&machine, &mut record, &context).await,
            NotificationOutcome::NotRequired
        );

        machine.update(1, Category::Red, None, None).unwrap();
        clock.advance(chrono::Duration::minutes(11));
        let mut record = machine.update(1, Category::Yellow, None, None).unwrap().record;
        assert_eq!(
            trigger.process(&machine, &mut record, &context).await,
            NotificationOutcome::NotRequired
        );
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_log_notifier_always_succeeds() {
        assert!(tokio_test::block_on(LogNotifier.send(1, "hello")).is_ok());
        let notifier = build_notifier(&NotifierKind::Log).unwrap();
        assert_eq!(notifier.name(), "log");
    }
}
