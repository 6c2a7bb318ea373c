//! Snapshot predictor: classifies a single metric vector.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::{infer_blocking, ClassModel, ModelError, PredictionResult};
use crate::telemetry::MetricSnapshot;

/// Confidence reported with a fallback verdict.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

const SNAPSHOT_MODEL_NAME: &str = "snapshot";

pub struct SnapshotPredictor {
    model: Option<Arc<dyn ClassModel>>,
    timeout: Duration,
}

impl SnapshotPredictor {
    pub fn new(model: Option<Arc<dyn ClassModel>>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// Classify one snapshot. Never fails: any fault yields a flagged
    /// class-0 fallback instead.
    pub async fn predict(&self, snapshot: &MetricSnapshot) -> PredictionResult {
        let Some(model) = self.model.clone() else {
            return fallback("model not loaded".to_string());
        };

        let name = model.name().to_string();
        let rows = vec![snapshot.snapshot_features()];

        let result = infer_blocking(model, rows, self.timeout)
            .await
            .and_then(|probs| PredictionResult::from_probabilities(&name, &probs, Utc::now()));

        match result {
            Ok(prediction) => prediction,
            Err(e @ ModelError::Timeout(_)) => {
                tracing::warn!("Snapshot inference for entity {}: {}", snapshot.entity_id, e);
                fallback(e.to_string())
            }
            Err(e) => {
                tracing::error!("Snapshot inference failed for entity {}: {}", snapshot.entity_id, e);
                fallback(e.to_string())
            }
        }
    }
}

fn fallback(reason: String) -> PredictionResult {
    PredictionResult {
        model_name: SNAPSHOT_MODEL_NAME.to_string(),
        class_code: 0,
        confidence: FALLBACK_CONFIDENCE,
        probabilities: None,
        timestamp: Utc::now(),
        fallback: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::testing::{model, one_hot};

    fn snapshot() -> MetricSnapshot {
        MetricSnapshot {
            latency_ms: 300.0,
            ..MetricSnapshot::zeroed(1, Utc::now())
        }
    }

    #[tokio::test]
    async fn test_genuine_prediction() {
        let predictor = SnapshotPredictor::new(
            Some(model("rf", |rows| {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].len(), 6);
                Ok(one_hot(2, 0.8))
            })),
            Duration::from_secs(1),
        );
        let result = predictor.predict(&snapshot()).await;
        assert_eq!(result.class_code, 2);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert_eq!(result.model_name, "rf");
        assert!(!result.is_fallback());
    }

    #[tokio::test]
    async fn test_missing_model_falls_back() {
        let predictor = SnapshotPredictor::new(None, Duration::from_secs(1));
        assert!(!predictor.is_available());
        let result = predictor.predict(&snapshot()).await;
        assert_eq!(result.class_code, 0);
        assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
        assert!(result.is_fallback());
    }

    #[tokio::test]
    async fn test_inference_error_falls_back() {
        let predictor = SnapshotPredictor::new(
            Some(model("rf", |_| Err(ModelError::Inference("boom".to_string())))),
            Duration::from_secs(1),
        );
        let result = predictor.predict(&snapshot()).await;
        assert!(result.fallback.unwrap().contains("boom"));
        assert_eq!(result.class_code, 0);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let predictor = SnapshotPredictor::new(
            Some(model("slow", |_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(one_hot(3, 0.9))
            })),
            Duration::from_millis(10),
        );
        let result = predictor.predict(&snapshot()).await;
        assert!(result.is_fallback());
        assert_eq!(result.class_code, 0);
    }
}
