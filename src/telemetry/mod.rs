//! Telemetry module.
//!
//! The engine only sees [`TelemetrySource`]; the simulator and any live
//! collector plug in behind it.

mod simulator;

pub use simulator::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Entity, EntityId};

/// Telemetry error types.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),
    #[error("malformed telemetry: {0}")]
    Malformed(String),
}

/// One measurement of an entity's line quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub entity_id: EntityId,
    pub latency_ms: f64,
    /// Packet loss in percent (0-100).
    pub packet_loss_ratio: f64,
    pub jitter_ms: f64,
    pub throughput_mbps: f64,
    /// Received signal level in dBm.
    pub signal_quality: f64,
    pub snr_margin_db: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSnapshot {
    /// All-zero vector used in place of unusable telemetry.
    pub fn zeroed(entity_id: EntityId, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            latency_ms: 0.0,
            packet_loss_ratio: 0.0,
            jitter_ms: 0.0,
            throughput_mbps: 0.0,
            signal_quality: 0.0,
            snr_margin_db: 0.0,
            timestamp,
        }
    }

    /// Feature vector for the snapshot classifier.
    pub fn snapshot_features(&self) -> Vec<f32> {
        vec![
            self.latency_ms as f32,
            self.packet_loss_ratio as f32,
            self.jitter_ms as f32,
            self.throughput_mbps as f32,
            self.signal_quality as f32,
            self.snr_margin_db as f32,
        ]
    }

    /// Per-step feature vector for the trend classifier.
    pub fn trend_features(&self) -> Vec<f32> {
        vec![
            self.latency_ms as f32,
            self.packet_loss_ratio as f32,
            self.snr_margin_db as f32,
            self.throughput_mbps as f32,
        ]
    }

    fn is_well_formed(&self) -> bool {
        let non_negative = [
            self.latency_ms,
            self.packet_loss_ratio,
            self.jitter_ms,
            self.throughput_mbps,
        ];
        non_negative.iter().all(|v| v.is_finite() && *v >= 0.0)
            && self.packet_loss_ratio <= 100.0
            && self.signal_quality.is_finite()
            && self.snr_margin_db.is_finite()
    }
}

/// Source of metric snapshots, live or simulated.
pub trait TelemetrySource: Send + Sync {
    fn sample(&self, entity_id: EntityId, plan_tier: &str) -> Result<MetricSnapshot, TelemetryError>;

    /// Called once before each full-population sweep.
    fn begin_cycle(&self, _population: &[Entity]) {}

    /// Sample used to pre-fill a window at startup.
    fn bootstrap_sample(&self, entity: &Entity, _troubled: bool) -> Result<MetricSnapshot, TelemetryError> {
        self.sample(entity.id, &entity.plan_tier)
    }
}

/// Outcome of reading telemetry for one evaluation.
#[derive(Debug, Clone)]
pub struct Reading {
    pub snapshot: MetricSnapshot,
    /// Why the raw reading was replaced by a zero vector, if it was.
    pub degraded: Option<String>,
}

/// Validate a raw sample, substituting a zero vector for anything unusable.
pub fn read_sample(
    result: Result<MetricSnapshot, TelemetryError>,
    entity_id: EntityId,
    now: DateTime<Utc>,
) -> Reading {
    match result {
        Ok(snapshot) if snapshot.is_well_formed() => Reading {
            snapshot,
            degraded: None,
        },
        Ok(snapshot) => {
            tracing::warn!("Malformed telemetry for entity {}: {:?}", entity_id, snapshot);
            Reading {
                snapshot: MetricSnapshot::zeroed(entity_id, snapshot.timestamp),
                degraded: Some("malformed telemetry replaced by zero vector".to_string()),
            }
        }
        Err(e) => {
            tracing::warn!("Telemetry failed for entity {}: {}", entity_id, e);
            Reading {
                snapshot: MetricSnapshot::zeroed(entity_id, now),
                degraded: Some(format!("{}; zero vector used", e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy(entity_id: EntityId) -> MetricSnapshot {
        MetricSnapshot {
            entity_id,
            latency_ms: 20.0,
            packet_loss_ratio: 0.01,
            jitter_ms: 3.0,
            throughput_mbps: 95.0,
            signal_quality: -45.0,
            snr_margin_db: 28.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_well_formed_reading_passes_through() {
        let snapshot = healthy(1);
        let reading = read_sample(Ok(snapshot.clone()), 1, Utc::now());
        assert_eq!(reading.snapshot, snapshot);
        assert!(reading.degraded.is_none());
    }

    #[test]
    fn test_malformed_reading_is_zeroed_and_flagged() {
        let mut snapshot = healthy(1);
        snapshot.latency_ms = f64::NAN;
        let reading = read_sample(Ok(snapshot), 1, Utc::now());
        assert_eq!(reading.snapshot.latency_ms, 0.0);
        assert_eq!(reading.snapshot.throughput_mbps, 0.0);
        assert!(reading.degraded.is_some());

        let mut negative = healthy(2);
        negative.packet_loss_ratio = -1.0;
        assert!(read_sample(Ok(negative), 2, Utc::now()).degraded.is_some());
    }

    #[test]
    fn test_failed_reading_is_zeroed_and_flagged() {
        let reading = read_sample(
            Err(TelemetryError::Unavailable("collector down".to_string())),
            7,
            Utc::now(),
        );
        assert_eq!(reading.snapshot.entity_id, 7);
        assert!(reading.degraded.unwrap().contains("collector down"));
    }

    #[test]
    fn test_feature_order() {
        let s = healthy(1);
        assert_eq!(s.snapshot_features(), vec![20.0, 0.01, 3.0, 95.0, -45.0, 28.0]);
        assert_eq!(s.trend_features(), vec![20.0, 0.01, 28.0, 95.0]);
    }
}
