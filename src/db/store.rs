//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("connection lock poisoned")]
    Poisoned,
    #[error("store unreachable: {0}")]
    Unreachable(String),
}

/// Busy, locked, or I/O-failing databases are reported as unreachable so
/// callers can skip the entity and retry later.
impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::CannotOpen
                        | ErrorCode::DiskFull
                ) =>
            {
                DbError::Unreachable(e.to_string())
            }
            _ => DbError::Sqlite(e),
        }
    }
}

/// Persistence primitives the decision engine needs.
///
/// The engine only relies on these calls, so any keyed store can back it.
pub trait StatusStore: Send + Sync {
    fn get_entities(&self) -> Result<Vec<Entity>, DbError>;
    fn get_entity(&self, id: EntityId) -> Result<Entity, DbError>;
    fn get_status(&self, id: EntityId) -> Result<Option<StatusRecord>, DbError>;
    fn upsert_status(&self, record: &StatusRecord) -> Result<(), DbError>;
    fn get_statuses(&self) -> Result<Vec<StatusRecord>, DbError>;
    /// Force every record back to GREEN. Returns the number of rows touched.
    fn reset_statuses(&self, now: DateTime<Utc>) -> Result<usize, DbError>;

    // --- Tickets ---

    /// Open a ticket, recording its first history entry and an action log line.
    fn create_ticket(&self, ticket: &NewTicket, now: DateTime<Utc>) -> Result<Ticket, DbError>;
    fn get_ticket(&self, id: TicketId) -> Result<Ticket, DbError>;
    /// Tickets of one entity created at or after `since`, newest first.
    fn get_entity_tickets(&self, entity_id: EntityId, since: DateTime<Utc>) -> Result<Vec<Ticket>, DbError>;
    /// Tickets in `status`, or every ticket not closed, most urgent first.
    fn get_tickets(&self, status: Option<TicketStatus>, limit: usize) -> Result<Vec<Ticket>, DbError>;
    fn update_ticket_status(
        &self,
        id: TicketId,
        new_status: TicketStatus,
        changed_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Ticket, DbError>;
    /// Append a signed note to the ticket's technician log.
    fn add_ticket_note(&self, id: TicketId, author: &str, note: &str, now: DateTime<Utc>) -> Result<Ticket, DbError>;
    fn get_ticket_history(&self, id: TicketId) -> Result<Vec<TicketStatusChange>, DbError>;
    fn get_action_log(&self, entity_id: EntityId, limit: usize) -> Result<Vec<ActionLogEntry>, DbError>;
}

const TICKET_COLUMNS: &str = "id, entity_id, status, priority, fault_type, scope, technician_note, \
                              assigned_to, created_at, updated_at, resolved_at";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        conn.execute_batch(include_str!("../../migrations/000002_tickets.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 2 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Entities ---

    /// Add entities in one transaction.
    pub fn add_entities(&self, entities: &[Entity]) -> Result<(), DbError> {
        if entities.is_empty() {
            return Ok(());
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO entities (id, name, plan_tier, region) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for e in entities {
                stmt.execute(params![e.id, e.name, e.plan_tier, e.region])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Run arbitrary SQL against the database, for tests that plant bad rows.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), DbError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

impl StatusStore for Store {
    fn get_entities(&self) -> Result<Vec<Entity>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, plan_tier, region FROM entities ORDER BY id")?;

        let entities = stmt
            .query_map([], entity_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entities)
    }

    fn get_entity(&self, id: EntityId) -> Result<Entity, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, plan_tier, region FROM entities WHERE id = ?1",
            params![id],
            entity_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    fn get_status(&self, id: EntityId) -> Result<Option<StatusRecord>, DbError> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT entity_id, current_category, previous_category, status_changed_at, fault_type,
                        estimated_fix_time, notified, notified_at, last_checked_at
                 FROM entity_status WHERE entity_id = ?1",
                params![id],
                status_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn upsert_status(&self, r: &StatusRecord) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entity_status (entity_id, current_category, previous_category, status_changed_at,
                                        fault_type, estimated_fix_time, notified, notified_at, last_checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(entity_id) DO UPDATE SET
             current_category=excluded.current_category,
             previous_category=excluded.previous_category,
             status_changed_at=excluded.status_changed_at,
             fault_type=excluded.fault_type,
             estimated_fix_time=excluded.estimated_fix_time,
             notified=excluded.notified,
             notified_at=excluded.notified_at,
             last_checked_at=excluded.last_checked_at",
            params![
                r.entity_id,
                r.current_category.as_str(),
                r.previous_category.map(Category::as_str),
                format_db_time(r.status_changed_at),
                r.fault_type,
                r.estimated_fix_time.map(format_db_time),
                r.notified,
                r.notified_at.map(format_db_time),
                format_db_time(r.last_checked_at),
            ],
        )?;
        Ok(())
    }

    fn get_statuses(&self) -> Result<Vec<StatusRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, current_category, previous_category, status_changed_at, fault_type,
                    estimated_fix_time, notified, notified_at, last_checked_at
             FROM entity_status ORDER BY entity_id",
        )?;

        let records = stmt
            .query_map([], status_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    fn reset_statuses(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let now = format_db_time(now);
        let rows = conn.execute(
            "UPDATE entity_status SET
             current_category = 'GREEN',
             previous_category = NULL,
             fault_type = NULL,
             estimated_fix_time = NULL,
             status_changed_at = ?1,
             last_checked_at = ?1,
             notified = 0,
             notified_at = NULL",
            params![now],
        )?;
        Ok(rows)
    }

    fn create_ticket(&self, ticket: &NewTicket, now: DateTime<Utc>) -> Result<Ticket, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let stamp = format_db_time(now);

        tx.execute(
            "INSERT INTO tickets (entity_id, status, priority, fault_type, scope, technician_note,
                                  assigned_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ticket.entity_id,
                TicketStatus::Created.as_str(),
                ticket.priority.as_str(),
                ticket.fault_type,
                ticket.scope.as_str(),
                ticket.technician_note,
                ticket.assigned_to,
                stamp,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO ticket_status_history (ticket_id, old_status, new_status, changed_by, note, changed_at)
             VALUES (?1, NULL, ?2, 'system', ?3, ?4)",
            params![
                id,
                TicketStatus::Created.as_str(),
                format!("Ticket opened, assigned to {}", ticket.assigned_to),
                stamp,
            ],
        )?;
        log_action(
            &tx,
            ticket.entity_id,
            "ticket_created",
            ticket.priority.as_str(),
            &format!("Ticket #{} opened for {} fault", id, ticket.scope.as_str().to_lowercase()),
            &stamp,
        )?;

        let created = ticket_by_id(&tx, id)?;
        tx.commit()?;
        Ok(created)
    }

    fn get_ticket(&self, id: TicketId) -> Result<Ticket, DbError> {
        let conn = self.conn()?;
        ticket_by_id(&conn, id)
    }

    fn get_entity_tickets(&self, entity_id: EntityId, since: DateTime<Utc>) -> Result<Vec<Ticket>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tickets WHERE entity_id = ?1 AND created_at >= ?2
             ORDER BY created_at DESC, id DESC",
            TICKET_COLUMNS
        ))?;

        let tickets = stmt
            .query_map(params![entity_id, format_db_time(since)], ticket_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(tickets)
    }

    fn get_tickets(&self, status: Option<TicketStatus>, limit: usize) -> Result<Vec<Ticket>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tickets
             WHERE (?1 IS NULL AND status != 'CLOSED') OR status = ?1
             ORDER BY CASE priority WHEN 'HIGH' THEN 1 WHEN 'MEDIUM' THEN 2 ELSE 3 END,
                      created_at DESC, id DESC
             LIMIT ?2",
            TICKET_COLUMNS
        ))?;

        let tickets = stmt
            .query_map(
                params![status.map(TicketStatus::as_str), limit as i64],
                ticket_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(tickets)
    }

    fn update_ticket_status(
        &self,
        id: TicketId,
        new_status: TicketStatus,
        changed_by: &str,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Ticket, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let stamp = format_db_time(now);
        let current = ticket_by_id(&tx, id)?;

        if new_status == TicketStatus::Resolved {
            tx.execute(
                "UPDATE tickets SET status = ?1, updated_at = ?2, resolved_at = ?2 WHERE id = ?3",
                params![new_status.as_str(), stamp, id],
            )?;
        } else {
            tx.execute(
                "UPDATE tickets SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_status.as_str(), stamp, id],
            )?;
        }

        tx.execute(
            "INSERT INTO ticket_status_history (ticket_id, old_status, new_status, changed_by, note, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, current.status.as_str(), new_status.as_str(), changed_by, note, stamp],
        )?;

        let mut log_note = format!("Ticket #{} {} -> {}", id, current.status, new_status);
        if let Some(note) = note {
            log_note.push_str(" | ");
            log_note.push_str(note);
        }
        log_action(
            &tx,
            current.entity_id,
            "ticket_status_update",
            new_status.as_str(),
            &log_note,
            &stamp,
        )?;

        let updated = ticket_by_id(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn add_ticket_note(&self, id: TicketId, author: &str, note: &str, now: DateTime<Utc>) -> Result<Ticket, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let stamp = format_db_time(now);
        let current = ticket_by_id(&tx, id)?;

        let entry = format!("--- {} ({}) ---\n{}", author, now.format("%Y-%m-%d %H:%M"), note);
        let combined = if current.technician_note.is_empty() {
            entry
        } else {
            format!("{}\n\n{}", current.technician_note, entry)
        };
        tx.execute(
            "UPDATE tickets SET technician_note = ?1, updated_at = ?2 WHERE id = ?3",
            params![combined, stamp, id],
        )?;

        let mut excerpt: String = note.chars().take(50).collect();
        if note.chars().count() > 50 {
            excerpt.push_str("...");
        }
        log_action(
            &tx,
            current.entity_id,
            "technician_note_added",
            "INFO",
            &format!("Ticket #{} {}: {}", id, author, excerpt),
            &stamp,
        )?;

        let updated = ticket_by_id(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    fn get_ticket_history(&self, id: TicketId) -> Result<Vec<TicketStatusChange>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ticket_id, old_status, new_status, changed_by, note, changed_at
             FROM ticket_status_history WHERE ticket_id = ?1 ORDER BY id",
        )?;

        let changes = stmt
            .query_map(params![id], |row| {
                let old_status: Option<String> = row.get(1)?;
                let new_status: String = row.get(2)?;
                let changed_at: String = row.get(5)?;
                Ok(TicketStatusChange {
                    ticket_id: row.get(0)?,
                    old_status: old_status.as_deref().map(|s| parse_column(1, s)).transpose()?,
                    new_status: parse_column(2, &new_status)?,
                    changed_by: row.get(3)?,
                    note: row.get(4)?,
                    changed_at: time_column(5, &changed_at)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(changes)
    }

    fn get_action_log(&self, entity_id: EntityId, limit: usize) -> Result<Vec<ActionLogEntry>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity_id, action_type, new_status, note, logged_at
             FROM action_log WHERE entity_id = ?1
             ORDER BY logged_at DESC, id DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![entity_id, limit as i64], |row| {
                let logged_at: String = row.get(5)?;
                Ok(ActionLogEntry {
                    id: row.get(0)?,
                    entity_id: row.get(1)?,
                    action_type: row.get(2)?,
                    new_status: row.get(3)?,
                    note: row.get(4)?,
                    logged_at: time_column(5, &logged_at)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }
}

fn ticket_by_id(conn: &Connection, id: TicketId) -> Result<Ticket, DbError> {
    conn.query_row(
        &format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS),
        params![id],
        ticket_from_row,
    )
    .optional()?
    .ok_or(DbError::NotFound)
}

fn log_action(
    conn: &Connection,
    entity_id: EntityId,
    action_type: &str,
    new_status: &str,
    note: &str,
    stamp: &str,
) -> SqlResult<()> {
    conn.execute(
        "INSERT INTO action_log (entity_id, action_type, new_status, note, logged_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entity_id, action_type, new_status, note, stamp],
    )?;
    Ok(())
}

fn entity_from_row(row: &Row<'_>) -> SqlResult<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        plan_tier: row.get(2)?,
        region: row.get(3)?,
    })
}

fn status_from_row(row: &Row<'_>) -> SqlResult<StatusRecord> {
    let current: String = row.get(1)?;
    let previous: Option<String> = row.get(2)?;
    let changed_at: String = row.get(3)?;
    let fix_time: Option<String> = row.get(5)?;
    let notified_at: Option<String> = row.get(7)?;
    let checked_at: String = row.get(8)?;

    Ok(StatusRecord {
        entity_id: row.get(0)?,
        current_category: parse_column(1, &current)?,
        previous_category: previous.as_deref().map(|p| parse_column(2, p)).transpose()?,
        status_changed_at: time_column(3, &changed_at)?,
        fault_type: row.get(4)?,
        estimated_fix_time: fix_time.as_deref().map(|t| time_column(5, t)).transpose()?,
        notified: row.get(6)?,
        notified_at: notified_at.as_deref().map(|t| time_column(7, t)).transpose()?,
        last_checked_at: time_column(8, &checked_at)?,
    })
}

fn ticket_from_row(row: &Row<'_>) -> SqlResult<Ticket> {
    let status: String = row.get(2)?;
    let priority: String = row.get(3)?;
    let scope: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: Option<String> = row.get(9)?;
    let resolved_at: Option<String> = row.get(10)?;

    Ok(Ticket {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        status: parse_column(2, &status)?,
        priority: parse_column(3, &priority)?,
        fault_type: row.get(4)?,
        scope: parse_column(5, &scope)?,
        technician_note: row.get(6)?,
        assigned_to: row.get(7)?,
        created_at: time_column(8, &created_at)?,
        updated_at: updated_at.as_deref().map(|t| time_column(9, t)).transpose()?,
        resolved_at: resolved_at.as_deref().map(|t| time_column(10, t)).transpose()?,
    })
}

/// Stored text that no longer parses is an error, never a silent default.
fn parse_column<T: FromStr<Err = String>>(idx: usize, raw: &str) -> SqlResult<T> {
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

fn time_column(idx: usize, raw: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(raw).ok_or_else(|| conversion_error(idx, format!("invalid timestamp {:?}", raw)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Try various formats
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
