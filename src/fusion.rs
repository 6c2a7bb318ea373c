//! Two-signal risk fusion.
//!
//! Combines the snapshot and trend verdicts into one risk score and a
//! traffic-light category. Everything here is a pure function of its inputs.

use serde::{Deserialize, Serialize};

use crate::db::Category;
use crate::predict::{PredictionResult, PredictorOutcome, MAX_CLASS};

/// Fusion weights and category thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub snapshot_weight: f64,
    pub trend_weight: f64,
    /// Risk strictly above this is RED.
    pub red_threshold: f64,
    /// Risk strictly above this (and not RED) is YELLOW.
    pub yellow_threshold: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            snapshot_weight: 0.6,
            trend_weight: 0.4,
            red_threshold: 0.6,
            yellow_threshold: 0.3,
        }
    }
}

/// Which input drove the fused score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Snapshot,
    Trend,
    None,
}

impl Signal {
    fn as_str(self) -> &'static str {
        match self {
            Signal::Snapshot => "snapshot",
            Signal::Trend => "trend",
            Signal::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionResult {
    pub risk_score: f64,
    pub category: Category,
    pub rationale: String,
    pub dominant: Signal,
    /// Fewer than two genuine signals, or the telemetry itself was unusable.
    pub degraded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EnsembleFusion {
    config: FusionConfig,
}

impl EnsembleFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Map a risk score to its category.
    pub fn category_for(&self, risk: f64) -> Category {
        if risk > self.config.red_threshold {
            Category::Red
        } else if risk > self.config.yellow_threshold {
            Category::Yellow
        } else {
            Category::Green
        }
    }

    /// Fuse two optional verdicts. Fallback results count as absent.
    pub fn combine(
        &self,
        snapshot: Option<&PredictionResult>,
        trend: Option<&PredictionResult>,
    ) -> FusionResult {
        let snapshot = snapshot.filter(|r| !r.is_fallback());
        let trend = trend.filter(|r| !r.is_fallback());

        let (risk, dominant, rationale) = match (snapshot, trend) {
            (Some(s), Some(t)) => {
                let s_part = severity(s) * s.confidence * self.config.snapshot_weight;
                let t_part = severity(t) * t.confidence * self.config.trend_weight;
                let dominant = if t_part > s_part {
                    Signal::Trend
                } else {
                    Signal::Snapshot
                };
                let rationale = format!(
                    "snapshot class {} @{:.2}, trend class {} @{:.2}; {} signal dominant",
                    s.class_code,
                    s.confidence,
                    t.class_code,
                    t.confidence,
                    dominant.as_str()
                );
                (s_part + t_part, dominant, rationale)
            }
            (Some(s), None) => (
                severity(s),
                Signal::Snapshot,
                format!("degraded, single signal: snapshot class {}", s.class_code),
            ),
            (None, Some(t)) => (
                severity(t),
                Signal::Trend,
                format!("degraded, single signal: trend class {}", t.class_code),
            ),
            (None, None) => (0.0, Signal::None, "no signal, defaulting safe".to_string()),
        };

        let risk_score = if risk.is_finite() {
            risk.clamp(0.0, 1.0)
        } else {
            0.0
        };

        FusionResult {
            risk_score,
            category: self.category_for(risk_score),
            rationale,
            dominant,
            degraded: snapshot.is_none() || trend.is_none(),
        }
    }

    /// Fuse predictor outcomes, explaining why any signal is missing.
    pub fn combine_outcomes(
        &self,
        snapshot: &PredictionResult,
        trend: &PredictorOutcome,
        telemetry_degraded: Option<&str>,
    ) -> FusionResult {
        let mut result = self.combine(Some(snapshot), trend.result());

        if let Some(reason) = &snapshot.fallback {
            result.rationale.push_str(&format!("; snapshot fallback: {}", reason));
        }
        if trend.result().is_none() {
            result.rationale.push_str(&format!("; trend {}", trend.describe()));
        }
        if let Some(reason) = telemetry_degraded {
            result.degraded = true;
            result.rationale.push_str(&format!("; telemetry: {}", reason));
        }

        result
    }
}

fn severity(result: &PredictionResult) -> f64 {
    result.class_code.min(MAX_CLASS) as f64 / MAX_CLASS as f64
}
