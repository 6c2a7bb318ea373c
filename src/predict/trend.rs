//! Trend predictor: classifies an entity's full rolling window and derives
//! a heuristic risk trajectory from it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::{infer_blocking, ClassModel, ModelError, PredictionResult, PredictorOutcome};
use crate::db::EntityId;
use crate::telemetry::MetricSnapshot;
use crate::window::RollingWindowCache;

/// Points compared on each side of the trend split.
const TREND_SPAN: usize = 3;
/// Extrapolation steps for a 30 minute forecast at 5 minute sampling.
const FORECAST_STEPS: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Critical level expected within 30 minutes.
    Urgent,
    /// Intervene before the trend gets worse.
    Proactive,
    /// Keep an eye on it; risk is rising.
    Watch,
    Stable,
}

impl Recommendation {
    pub fn message(self) -> &'static str {
        match self {
            Recommendation::Urgent => "Immediate intervention required: critical level expected within 30 minutes",
            Recommendation::Proactive => "Proactive intervention recommended: trend is worsening",
            Recommendation::Watch => "Put under observation: risk is rising",
            Recommendation::Stable => "Line is stable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendSeverity {
    High,
    Medium,
    Low,
}

/// Heuristic trajectory of an entity's composite risk.
#[derive(Debug, Clone, Serialize)]
pub struct TrendAnalysis {
    pub current_risk: f64,
    pub direction: TrendDirection,
    pub forecast_30min: f64,
    pub risk_chart: Vec<f64>,
    pub recommendation: Recommendation,
    pub severity: TrendSeverity,
}

/// Composite 0..1 risk of a single point.
pub fn composite_risk(s: &MetricSnapshot) -> f64 {
    let snr_penalty = ((10.0 - s.snr_margin_db) / 10.0).max(0.0);
    (s.latency_ms / 200.0 + s.packet_loss_ratio / 10.0 + snr_penalty).clamp(0.0, 1.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Analyze a window's risk trajectory. `None` for an empty window.
pub fn analyze_window(window: &[MetricSnapshot]) -> Option<TrendAnalysis> {
    let scores: Vec<f64> = window.iter().map(composite_risk).collect();
    let current_risk = *scores.last()?;
    let n = scores.len();

    let direction = if n >= TREND_SPAN * 2 {
        let recent = mean(&scores[n - TREND_SPAN..]);
        let older = mean(&scores[n - TREND_SPAN * 2..n - TREND_SPAN]);
        if recent > older * 1.2 {
            TrendDirection::Rising
        } else if recent < older * 0.8 {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        }
    } else {
        TrendDirection::Stable
    };

    let forecast_30min = if direction == TrendDirection::Rising && n >= TREND_SPAN {
        let slope = (scores[n - 1] - scores[n - 3]) / 2.0;
        (current_risk + slope * FORECAST_STEPS).clamp(0.0, 1.0)
    } else {
        current_risk
    };

    let recommendation = if forecast_30min > 0.7 {
        Recommendation::Urgent
    } else if forecast_30min > 0.4 {
        Recommendation::Proactive
    } else if direction == TrendDirection::Rising {
        Recommendation::Watch
    } else {
        Recommendation::Stable
    };

    let severity = if forecast_30min > 0.7 {
        TrendSeverity::High
    } else if forecast_30min > 0.4 {
        TrendSeverity::Medium
    } else {
        TrendSeverity::Low
    };

    Some(TrendAnalysis {
        current_risk,
        direction,
        forecast_30min,
        risk_chart: scores,
        recommendation,
        severity,
    })
}

/// Wraps the sequence classifier over an entity's rolling window.
pub struct TrendPredictor {
    window: Arc<RollingWindowCache>,
    model: Option<Arc<dyn ClassModel>>,
    timeout: Duration,
}

impl TrendPredictor {
    pub fn new(
        window: Arc<RollingWindowCache>,
        model: Option<Arc<dyn ClassModel>>,
        timeout: Duration,
    ) -> Self {
        Self {
            window,
            model,
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// Classify the entity's current window.
    pub async fn predict(&self, entity_id: EntityId) -> PredictorOutcome {
        let window = self.window.get(entity_id);
        self.predict_window(&window).await
    }

    /// Classify an explicit window (used to evaluate a window before it is committed).
    pub async fn predict_window(&self, window: &[MetricSnapshot]) -> PredictorOutcome {
        let need = self.window.capacity();
        if window.len() < need {
            return PredictorOutcome::Insufficient {
                have: window.len(),
                need,
            };
        }

        let Some(model) = self.model.clone() else {
            return PredictorOutcome::Unavailable {
                reason: "model not loaded".to_string(),
            };
        };

        let name = model.name().to_string();
        let rows: Vec<Vec<f32>> = window[window.len() - need..]
            .iter()
            .map(MetricSnapshot::trend_features)
            .collect();

        let result = infer_blocking(model, rows, self.timeout)
            .await
            .and_then(|probs| PredictionResult::from_probabilities(&name, &probs, Utc::now()));

        match result {
            Ok(prediction) => PredictorOutcome::Ready(prediction),
            Err(ModelError::Timeout(after)) => {
                tracing::warn!("Trend inference timed out after {:?}", after);
                PredictorOutcome::Timeout {
                    after_ms: after.as_millis() as u64,
                }
            }
            Err(e) => {
                tracing::error!("Trend inference failed: {}", e);
                PredictorOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Risk trajectory of the entity's current window.
    pub fn analyze_trend(&self, entity_id: EntityId) -> Option<TrendAnalysis> {
        analyze_window(&self.window.get(entity_id))
    }
}
