//! Predictor wrappers around pretrained classifiers.
//!
//! Both predictors hide every model fault behind a tagged outcome, so
//! nothing past this module ever sees an inference error.

mod artifact;
mod snapshot;
mod trend;

pub use artifact::*;
pub use snapshot::*;
pub use trend::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Highest class code a model may emit (classes are 0..=3).
pub const MAX_CLASS: u8 = 3;

/// Model error types.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load artifact: {0}")]
    Load(String),
    #[error("input shape mismatch: expected {expected}, got {got}")]
    Shape { expected: usize, got: usize },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

/// A classifier that maps a sequence of feature rows to class probabilities.
///
/// Snapshot models receive a single row, trend models the whole window.
pub trait ClassModel: Send + Sync {
    fn name(&self) -> &str;
    fn predict_proba(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>, ModelError>;
}

/// One model's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub model_name: String,
    pub class_code: u8,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<f64>>,
    pub timestamp: DateTime<Utc>,
    /// Set when this is a stand-in value rather than a genuine prediction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl PredictionResult {
    /// Arg-max class with its probability as confidence.
    pub fn from_probabilities(
        model_name: &str,
        probabilities: &[f32],
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        if probabilities.is_empty() || probabilities.len() > MAX_CLASS as usize + 1 {
            return Err(ModelError::Shape {
                expected: MAX_CLASS as usize + 1,
                got: probabilities.len(),
            });
        }
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::Inference("non-finite probability".to_string()));
        }

        let (class_code, confidence) = probabilities
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best });

        Ok(Self {
            model_name: model_name.to_string(),
            class_code: class_code as u8,
            confidence: (confidence as f64).clamp(0.0, 1.0),
            probabilities: Some(probabilities.iter().map(|&p| p as f64).collect()),
            timestamp,
            fallback: None,
        })
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Tagged result of asking a predictor for a verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictorOutcome {
    Ready(PredictionResult),
    /// Not enough history yet; expected during warm-up.
    Insufficient { have: usize, need: usize },
    Unavailable { reason: String },
    Timeout { after_ms: u64 },
}

impl PredictorOutcome {
    pub fn result(&self) -> Option<&PredictionResult> {
        match self {
            PredictorOutcome::Ready(r) => Some(r),
            _ => None,
        }
    }

    /// Short reason used in fusion rationales.
    pub fn describe(&self) -> String {
        match self {
            PredictorOutcome::Ready(r) => format!("class {} @{:.2}", r.class_code, r.confidence),
            PredictorOutcome::Insufficient { have, need } => {
                format!("insufficient data {}/{}", have, need)
            }
            PredictorOutcome::Unavailable { reason } => format!("unavailable: {}", reason),
            PredictorOutcome::Timeout { after_ms } => format!("timed out after {}ms", after_ms),
        }
    }
}

/// Run inference on the blocking pool, bounded by `limit`.
pub(crate) async fn infer_blocking(
    model: Arc<dyn ClassModel>,
    rows: Vec<Vec<f32>>,
    limit: Duration,
) -> Result<Vec<f32>, ModelError> {
    let task = tokio::task::spawn_blocking(move || model.predict_proba(&rows));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(ModelError::Inference(format!("inference task failed: {}", e))),
        Err(_) => Err(ModelError::Timeout(limit)),
    }
}
