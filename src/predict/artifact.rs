//! Pretrained classifier artifacts.
//!
//! An artifact is a JSON file holding a fitted min-max scaler and a
//! softmax-linear head over the flattened, scaled input rows.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ClassModel, ModelError};

/// Per-feature min-max normalizer fitted at training time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl MinMaxScaler {
    pub fn transform(&self, row: &[f32]) -> Result<Vec<f32>, ModelError> {
        if row.len() != self.min.len() {
            return Err(ModelError::Shape {
                expected: self.min.len(),
                got: row.len(),
            });
        }

        Ok(row
            .iter()
            .zip(self.min.iter().zip(&self.max))
            .map(|(&x, (&lo, &hi))| {
                let range = hi - lo;
                if range.abs() < f32::EPSILON {
                    0.0
                } else {
                    (x - lo) / range
                }
            })
            .collect())
    }
}

/// Softmax-linear classifier loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearArtifact {
    pub name: String,
    /// Rows expected per prediction (1 for snapshots, window length for trends).
    pub steps: usize,
    /// Features per row.
    pub features: usize,
    /// One weight row per class, each `steps * features` long.
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub scaler: Option<MinMaxScaler>,
}

impl LinearArtifact {
    /// Load and validate an artifact file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;
        let artifact: Self = serde_json::from_str(&raw)
            .map_err(|e| ModelError::Load(format!("{}: {}", path.display(), e)))?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let inputs = self.steps * self.features;
        if self.weights.is_empty() || self.weights.len() != self.bias.len() {
            return Err(ModelError::Load(format!(
                "{} weight rows but {} biases",
                self.weights.len(),
                self.bias.len()
            )));
        }
        if let Some(bad) = self.weights.iter().find(|w| w.len() != inputs) {
            return Err(ModelError::Shape {
                expected: inputs,
                got: bad.len(),
            });
        }
        if let Some(scaler) = &self.scaler {
            if scaler.min.len() != self.features || scaler.max.len() != self.features {
                return Err(ModelError::Load("scaler does not match feature count".to_string()));
            }
        }
        Ok(())
    }
}

impl ClassModel for LinearArtifact {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict_proba(&self, rows: &[Vec<f32>]) -> Result<Vec<f32>, ModelError> {
        if rows.len() != self.steps {
            return Err(ModelError::Shape {
                expected: self.steps,
                got: rows.len(),
            });
        }

        let mut input = Vec::with_capacity(self.steps * self.features);
        for row in rows {
            if row.len() != self.features {
                return Err(ModelError::Shape {
                    expected: self.features,
                    got: row.len(),
                });
            }
            match &self.scaler {
                Some(scaler) => input.extend(scaler.transform(row)?),
                None => input.extend_from_slice(row),
            }
        }

        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| w.iter().zip(&input).map(|(wi, xi)| wi * xi).sum::<f32>() + b)
            .collect();

        softmax(&logits)
    }
}

fn softmax(logits: &[f32]) -> Result<Vec<f32>, ModelError> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return Err(ModelError::Inference("non-finite logits".to_string()));
    }
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

/// Load an artifact, logging instead of failing when it is unusable.
pub fn load_model(path: &str) -> Option<Arc<dyn ClassModel>> {
    match LinearArtifact::load(path) {
        Ok(artifact) => {
            tracing::info!("Loaded model '{}' from {}", artifact.name, path);
            Some(Arc::new(artifact))
        }
        Err(e) => {
            tracing::warn!("Model at {} unavailable: {}", path, e);
            None
        }
    }
}
