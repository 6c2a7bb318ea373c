//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a monitored entity (a subscriber line).
pub type EntityId = i64;

/// A monitored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub plan_tier: String,
    pub region: String,
}

impl Default for Entity {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            plan_tier: "100 Mbps Fiber".to_string(),
            region: "Region_1".to_string(),
        }
    }
}

/// Traffic-light risk category, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Green,
    Yellow,
    Red,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Green, Category::Yellow, Category::Red];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Green => "GREEN",
            Category::Yellow => "YELLOW",
            Category::Red => "RED",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GREEN" => Ok(Category::Green),
            "YELLOW" => Ok(Category::Yellow),
            "RED" => Ok(Category::Red),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// Long-lived decision state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub entity_id: EntityId,
    pub current_category: Category,
    pub previous_category: Option<Category>,
    pub status_changed_at: DateTime<Utc>,
    pub fault_type: Option<String>,
    pub estimated_fix_time: Option<DateTime<Utc>>,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
    pub last_checked_at: DateTime<Utc>,
}

impl StatusRecord {
    /// A fresh GREEN record for an entity seen for the first time.
    pub fn new(entity_id: EntityId, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            current_category: Category::Green,
            previous_category: None,
            status_changed_at: now,
            fault_type: None,
            estimated_fix_time: None,
            notified: false,
            notified_at: None,
            last_checked_at: now,
        }
    }
}

/// Number of entities per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    #[serde(rename = "GREEN")]
    pub green: usize,
    #[serde(rename = "YELLOW")]
    pub yellow: usize,
    #[serde(rename = "RED")]
    pub red: usize,
}

impl CategoryCounts {
    pub fn add(&mut self, category: Category) {
        match category {
            Category::Green => self.green += 1,
            Category::Yellow => self.yellow += 1,
            Category::Red => self.red += 1,
        }
    }
}

/// Identifier of a field-repair ticket.
pub type TicketId = i64;

/// Lifecycle of a repair ticket. Only `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Created,
    Assigned,
    EnRoute,
    OnSite,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Created => "CREATED",
            TicketStatus::Assigned => "ASSIGNED",
            TicketStatus::EnRoute => "EN_ROUTE",
            TicketStatus::OnSite => "ON_SITE",
            TicketStatus::Resolved => "RESOLVED",
            TicketStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(TicketStatus::Created),
            "ASSIGNED" => Ok(TicketStatus::Assigned),
            "EN_ROUTE" => Ok(TicketStatus::EnRoute),
            "ON_SITE" => Ok(TicketStatus::OnSite),
            "RESOLVED" => Ok(TicketStatus::Resolved),
            "CLOSED" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    /// Default urgency for a line currently in `category`.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Red => Priority::High,
            Category::Yellow => Priority::Medium,
            Category::Green => Priority::Low,
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Whether a fault hits one line or a whole region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scope {
    Individual,
    Regional,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Individual => "INDIVIDUAL",
            Scope::Regional => "REGIONAL",
        }
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INDIVIDUAL" => Ok(Scope::Individual),
            "REGIONAL" => Ok(Scope::Regional),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// A field-repair ticket raised against an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: TicketId,
    pub entity_id: EntityId,
    pub status: TicketStatus,
    pub priority: Priority,
    pub fault_type: Option<String>,
    pub scope: Scope,
    pub technician_note: String,
    pub assigned_to: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fields of a ticket about to be opened.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub entity_id: EntityId,
    pub priority: Priority,
    pub fault_type: Option<String>,
    pub scope: Scope,
    pub technician_note: String,
    pub assigned_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketStatusChange {
    pub ticket_id: TicketId,
    pub old_status: Option<TicketStatus>,
    pub new_status: TicketStatus,
    pub changed_by: String,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// One line of an entity's operator audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub entity_id: EntityId,
    pub action_type: String,
    pub new_status: String,
    pub note: String,
    pub logged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_order_is_severity() {
        assert!(Category::Green < Category::Yellow);
        assert!(Category::Yellow < Category::Red);
    }

    #[test]
    fn test_category_string_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("PURPLE".parse::<Category>().is_err());
        assert_eq!(serde_json::to_string(&Category::Red).unwrap(), "\"RED\"");
    }

    #[test]
    fn test_counts_serialize_with_category_names() {
        let mut counts = CategoryCounts::default();
        counts.add(Category::Red);
        counts.add(Category::Green);
        counts.add(Category::Green);
        assert_eq!(counts, CategoryCounts { green: 2, yellow: 0, red: 1 });
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["GREEN"], 2);
        assert_eq!(json["RED"], 1);
    }

    #[test]
    fn test_ticket_enums_parse_their_names() {
        for status in [
            TicketStatus::Created,
            TicketStatus::Assigned,
            TicketStatus::EnRoute,
            TicketStatus::OnSite,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert_eq!(serde_json::to_string(&TicketStatus::EnRoute).unwrap(), "\"EN_ROUTE\"");
        assert!("en_route".parse::<TicketStatus>().is_err());
        assert_eq!("REGIONAL".parse::<Scope>().unwrap(), Scope::Regional);
        assert_eq!(Priority::for_category(Category::Red), Priority::High);
        assert_eq!(Priority::for_category(Category::Green).as_str(), "LOW");
    }
}
