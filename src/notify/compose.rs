//! Alert message templates.

use super::{AlertContext, Severity};
use crate::db::StatusRecord;

/// Human-readable cause for a classifier class code.
pub fn fault_reason(class_code: u8) -> &'static str {
    match class_code {
        0 => "Planned maintenance",
        1 => "Regional congestion",
        2 => "Weak signal quality",
        3 => "Packet loss",
        _ => "Technical fault",
    }
}

/// Renders alert text from a status record and its evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageComposer;

impl MessageComposer {
    pub fn compose(&self, record: &StatusRecord, severity: Severity, context: &AlertContext<'_>) -> String {
        let entity = context.entity;
        let previous = record
            .previous_category
            .map(|c| c.as_str())
            .unwrap_or("-");

        if severity == Severity::Info {
            return format!(
                "*{}* {} ({}, {})\nService restored: {} -> {}",
                severity.as_str(),
                entity.name,
                entity.plan_tier,
                entity.region,
                previous,
                record.current_category
            );
        }

        let mut text = format!(
            "*{}* {} ({}, {})\nStatus: {} -> {}\nCause: {}\nRisk: {:.2} ({})",
            severity.as_str(),
            entity.name,
            entity.plan_tier,
            entity.region,
            previous,
            record.current_category,
            fault_reason(context.class_code),
            context.fusion.risk_score,
            context.fusion.rationale
        );
        if let Some(fault) = &record.fault_type {
            text.push_str(&format!("\nFault: {}", fault));
        }
        if let Some(fix) = record.estimated_fix_time {
            text.push_str(&format!("\nEstimated fix: {}", fix.format("%Y-%m-%d %H:%M UTC")));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Category, Entity};
    use crate::fusion::{FusionResult, Signal};
    use chrono::{TimeZone, Utc};

    fn record(previous: Category, current: Category) -> StatusRecord {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        StatusRecord {
            previous_category: Some(previous),
            current_category: current,
            fault_type: Some("packet_loss".to_string()),
            estimated_fix_time: Some(now + chrono::Duration::hours(4)),
            ..StatusRecord::new(7, now)
        }
    }

    #[test]
    fn test_fault_reasons() {
        assert_eq!(fault_reason(0), "Planned maintenance");
        assert_eq!(fault_reason(3), "Packet loss");
        assert_eq!(fault_reason(9), "Technical fault");
    }

    #[test]
    fn test_degradation_message() {
        let entity = Entity {
            id: 7,
            name: "Subscriber 0007".to_string(),
            ..Entity::default()
        };
        let fusion = FusionResult {
            risk_score: 0.95,
            category: Category::Red,
            rationale: "snapshot dominant".to_string(),
            dominant: Signal::Snapshot,
            degraded: false,
        };
        let context = AlertContext {
            entity: &entity,
            fusion: &fusion,
            class_code: 3,
        };

        let text = MessageComposer.compose(&record(Category::Green, Category::Red), Severity::Critical, &context);
        assert!(text.starts_with("*CRITICAL* Subscriber 0007"));
        assert!(text.contains("GREEN -> RED"));
        assert!(text.contains("Cause: Packet loss"));
        assert!(text.contains("Risk: 0.95"));
        assert!(text.contains("Estimated fix: 2024-05-01 16:00 UTC"));
    }

    #[test]
    fn test_recovery_message() {
        let entity = Entity::default();
        let fusion = FusionResult {
            risk_score: 0.0,
            category: Category::Green,
            rationale: String::new(),
            dominant: Signal::None,
            degraded: true,
        };
        let context = AlertContext {
            entity: &entity,
            fusion: &fusion,
            class_code: 0,
        };
        let text = MessageComposer.compose(&record(Category::Red, Category::Green), Severity::Info, &context);
        assert!(text.contains("Service restored: RED -> GREEN"));
        assert!(!text.contains("Cause"));
    }
}
