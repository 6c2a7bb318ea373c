//! Field-repair tickets.
//!
//! Operators open a ticket against a degraded line and walk it through the
//! dispatch lifecycle. Ticket writes take the entity's lock, so they never
//! interleave with an evaluation of the same line.

use chrono::Duration as ChronoDuration;
use serde::Serialize;

use super::{Engine, EngineError};
use crate::db::{
    ActionLogEntry, Category, DbError, EntityId, NewTicket, Priority, Scope, Ticket, TicketId, TicketStatus,
    TicketStatusChange,
};

/// How far back an entity's ticket list reaches.
const TICKET_LOOKBACK_DAYS: i64 = 30;
const MAX_PAGE: usize = 500;
const DEFAULT_ASSIGNEE: &str = "Field team";

/// Request to open a ticket. Unset fields are derived from the entity's status.
#[derive(Debug, Clone, Default)]
pub struct TicketRequest {
    pub entity_id: EntityId,
    pub priority: Option<Priority>,
    pub fault_type: Option<String>,
    pub scope: Option<Scope>,
    pub technician_note: String,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketUpdate {
    pub old_status: TicketStatus,
    pub ticket: Ticket,
    /// The line was repaired, so its rolling window was dropped.
    pub window_cleared: bool,
}

impl Engine {
    /// Open a ticket. Priority follows the current category and the fault
    /// type comes from the status record unless the request sets them.
    pub async fn open_ticket(&self, request: TicketRequest) -> Result<Ticket, EngineError> {
        self.entity(request.entity_id)?;
        let lock = self.entity_lock(request.entity_id);
        let _guard = lock.lock().await;

        let record = self.store.get_status(request.entity_id)?;
        let category = record
            .as_ref()
            .map(|r| r.current_category)
            .unwrap_or(Category::Green);

        let new = NewTicket {
            entity_id: request.entity_id,
            priority: request
                .priority
                .unwrap_or_else(|| Priority::for_category(category)),
            fault_type: request.fault_type.or_else(|| record.and_then(|r| r.fault_type)),
            scope: request.scope.unwrap_or(Scope::Individual),
            technician_note: request.technician_note,
            assigned_to: request
                .assigned_to
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ASSIGNEE.to_string()),
        };

        let ticket = self.store.create_ticket(&new, self.clock.now())?;
        tracing::info!(
            "Opened ticket #{} for entity {} ({} priority)",
            ticket.id,
            ticket.entity_id,
            ticket.priority.as_str()
        );
        Ok(ticket)
    }

    /// Tickets of one entity from the last 30 days, newest first.
    pub fn entity_tickets(&self, entity_id: EntityId) -> Result<Vec<Ticket>, EngineError> {
        self.entity(entity_id)?;
        let since = self.clock.now() - ChronoDuration::days(TICKET_LOOKBACK_DAYS);
        Ok(self.store.get_entity_tickets(entity_id, since)?)
    }

    /// Tickets in `status`, or all open ones, most urgent first.
    pub fn list_tickets(&self, status: Option<TicketStatus>, limit: usize) -> Result<Vec<Ticket>, EngineError> {
        Ok(self.store.get_tickets(status, limit.clamp(1, MAX_PAGE))?)
    }

    fn ticket(&self, id: TicketId) -> Result<Ticket, EngineError> {
        self.store.get_ticket(id).map_err(|e| match e {
            DbError::NotFound => EngineError::UnknownTicket(id),
            other => EngineError::Store(other),
        })
    }

    /// Move a ticket to `new_status`.
    ///
    /// Resolving a ticket drops the entity's window: samples from before the
    /// repair no longer describe the line.
    pub async fn update_ticket_status(
        &self,
        id: TicketId,
        new_status: TicketStatus,
        changed_by: &str,
        note: Option<&str>,
    ) -> Result<TicketUpdate, EngineError> {
        if changed_by.trim().is_empty() {
            return Err(EngineError::Invalid("changed_by is required".to_string()));
        }

        let entity_id = self.ticket(id)?.entity_id;
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().await;

        let current = self.ticket(id)?;
        if current.status == TicketStatus::Closed {
            return Err(EngineError::TicketClosed(id));
        }

        let ticket = self
            .store
            .update_ticket_status(id, new_status, changed_by, note, self.clock.now())?;

        let window_cleared = new_status == TicketStatus::Resolved && current.status != TicketStatus::Resolved;
        if window_cleared {
            self.window.clear(entity_id);
        }

        tracing::info!(
            "Ticket #{} {} -> {} by {}",
            id,
            current.status,
            new_status,
            changed_by
        );
        Ok(TicketUpdate {
            old_status: current.status,
            ticket,
            window_cleared,
        })
    }

    pub async fn add_ticket_note(&self, id: TicketId, author: &str, note: &str) -> Result<Ticket, EngineError> {
        if author.trim().is_empty() || note.trim().is_empty() {
            return Err(EngineError::Invalid("author and note are required".to_string()));
        }

        let entity_id = self.ticket(id)?.entity_id;
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().await;

        Ok(self.store.add_ticket_note(id, author, note, self.clock.now())?)
    }

    pub fn ticket_history(&self, id: TicketId) -> Result<Vec<TicketStatusChange>, EngineError> {
        self.ticket(id)?;
        Ok(self.store.get_ticket_history(id)?)
    }

    /// Operator audit trail of one entity, newest first.
    pub fn action_log(&self, entity_id: EntityId, limit: usize) -> Result<Vec<ActionLogEntry>, EngineError> {
        self.entity(entity_id)?;
        Ok(self.store.get_action_log(entity_id, limit.clamp(1, MAX_PAGE))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::EngineConfig;
    use crate::db::{Entity, Store};
    use crate::engine::EngineDeps;
    use crate::notify::LogNotifier;
    use crate::telemetry::{MetricSnapshot, Simulator, SimulatorConfig};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn engine(tmp: &NamedTempFile, clock: Arc<ManualClock>) -> Engine {
        let store = Store::new(tmp.path()).unwrap();
        let entities: Vec<Entity> = (1..=2)
            .map(|id| Entity {
                id,
                name: format!("Subscriber {:04}", id),
                ..Entity::default()
            })
            .collect();
        store.add_entities(&entities).unwrap();

        Engine::new(
            EngineConfig::default(),
            EngineDeps {
                store: Arc::new(store),
                telemetry: Arc::new(Simulator::with_seed(SimulatorConfig::default(), 11)),
                notifier: Arc::new(LogNotifier),
                clock,
                snapshot_model: None,
                trend_model: None,
            },
        )
    }

    #[tokio::test]
    async fn test_open_ticket_derives_fields_from_status() {
        let tmp = NamedTempFile::new().unwrap();
        let engine = engine(&tmp, Arc::new(ManualClock::new(Utc::now())));
        engine
            .machine
            .update(1, Category::Red, Some("packet_loss"), None)
            .unwrap();

        let ticket = engine
            .open_ticket(TicketRequest {
                entity_id: 1,
                ..TicketRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Created);
        assert_eq!(ticket.priority, Priority::High);
        assert_eq!(ticket.fault_type.as_deref(), Some("packet_loss"));
        assert_eq!(ticket.scope, Scope::Individual);
        assert_eq!(ticket.assigned_to, "Field team");

        // Explicit fields win; a never-evaluated entity is treated as GREEN.
        let ticket = engine
            .open_ticket(TicketRequest {
                entity_id: 2,
                scope: Some(Scope::Regional),
                fault_type: Some("line_fault".to_string()),
                assigned_to: Some("Crew 4".to_string()),
                ..TicketRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(ticket.priority, Priority::Low);
        assert_eq!(ticket.scope, Scope::Regional);
        assert_eq!(ticket.assigned_to, "Crew 4");

        assert!(matches!(
            engine
                .open_ticket(TicketRequest {
                    entity_id: 77,
                    ..TicketRequest::default()
                })
                .await,
            Err(EngineError::UnknownEntity(77))
        ));
    }

    #[tokio::test]
    async fn test_resolving_clears_window_and_closing_is_final() {
        let tmp = NamedTempFile::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(&tmp, clock.clone());
        for _ in 0..3 {
            engine.window().add(1, MetricSnapshot::zeroed(1, clock.now()));
        }
        let ticket = engine
            .open_ticket(TicketRequest {
                entity_id: 1,
                ..TicketRequest::default()
            })
            .await
            .unwrap();

        let update = engine
            .update_ticket_status(ticket.id, TicketStatus::EnRoute, "dispatch", None)
            .await
            .unwrap();
        assert!(!update.window_cleared);
        assert_eq!(engine.window().size(1), 3);

        let update = engine
            .update_ticket_status(ticket.id, TicketStatus::Resolved, "tech", Some("replaced modem"))
            .await
            .unwrap();
        assert_eq!(update.old_status, TicketStatus::EnRoute);
        assert!(update.window_cleared);
        assert!(update.ticket.resolved_at.is_some());
        assert_eq!(engine.window().size(1), 0);

        engine
            .update_ticket_status(ticket.id, TicketStatus::Closed, "ops", None)
            .await
            .unwrap();
        assert!(matches!(
            engine
                .update_ticket_status(ticket.id, TicketStatus::Assigned, "ops", None)
                .await,
            Err(EngineError::TicketClosed(_))
        ));
        assert_eq!(engine.ticket_history(ticket.id).unwrap().len(), 4);

        assert!(matches!(
            engine
                .update_ticket_status(ticket.id, TicketStatus::Assigned, " ", None)
                .await,
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            engine
                .update_ticket_status(404, TicketStatus::Assigned, "ops", None)
                .await,
            Err(EngineError::UnknownTicket(404))
        ));
    }

    #[tokio::test]
    async fn test_ticket_listing_and_audit_trail() {
        let tmp = NamedTempFile::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = engine(&tmp, clock.clone());
        let request = TicketRequest {
            entity_id: 1,
            ..TicketRequest::default()
        };

        let old = engine.open_ticket(request.clone()).await.unwrap();
        clock.advance(ChronoDuration::days(31));
        let fresh = engine.open_ticket(request).await.unwrap();

        let recent: Vec<TicketId> = engine.entity_tickets(1).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(recent, vec![fresh.id]);
        assert_eq!(engine.list_tickets(None, 50).unwrap().len(), 2);
        assert_eq!(engine.list_tickets(None, 0).unwrap().len(), 1);

        let noted = engine
            .add_ticket_note(old.id, "selin", "Cabinet door forced open")
            .await
            .unwrap();
        assert!(noted.technician_note.ends_with("Cabinet door forced open"));
        assert!(matches!(
            engine.add_ticket_note(old.id, "selin", "").await,
            Err(EngineError::Invalid(_))
        ));

        let log = engine.action_log(1, 10).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].action_type, "technician_note_added");
        assert!(matches!(engine.action_log(5, 10), Err(EngineError::UnknownEntity(5))));
    }
}
