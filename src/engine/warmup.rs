//! Startup window bootstrap.
//!
//! Fills every entity's window with synthetic history so the trend
//! predictor has a full window on the first sweep. With some probability one
//! region gets a fault pattern: most of its entities turn troubled partway
//! through their history.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::{Engine, EngineError};
use crate::telemetry::read_sample;

/// Share of a faulty region's entities given troubled history.
const REGIONAL_IMPACT: f64 = 0.7;
/// Sample index from which troubled entities degrade.
const TROUBLE_FROM: usize = 6;

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupSummary {
    pub entities: usize,
    pub samples: usize,
    pub faulty_region: Option<String>,
    pub troubled: usize,
    /// Stopped before every entity was filled.
    pub interrupted: bool,
}

impl Engine {
    pub async fn warm_up(&self) -> Result<WarmupSummary, EngineError> {
        self.warm_up_with(&mut StdRng::from_entropy()).await
    }

    /// Warm-up with a caller-provided random source.
    pub async fn warm_up_with(&self, rng: &mut StdRng) -> Result<WarmupSummary, EngineError> {
        let entities = self.store.get_entities()?;
        let capacity = self.window.capacity();
        let mut summary = WarmupSummary {
            entities: entities.len(),
            ..Default::default()
        };

        let p = self.config.warmup_fault_probability;
        let faulty_region = if p.is_finite() && rng.gen_bool(p.clamp(0.0, 1.0)) {
            let mut regions: Vec<&str> = entities.iter().map(|e| e.region.as_str()).collect();
            regions.sort_unstable();
            regions.dedup();
            regions.choose(rng).map(|r| r.to_string())
        } else {
            None
        };
        if let Some(region) = &faulty_region {
            tracing::warn!("Warm-up: simulating regional fault in {}", region);
        }

        tracing::info!(
            "Warm-up: filling {} windows with {} samples each",
            entities.len(),
            capacity
        );

        for entity in &entities {
            if self.is_stopping() {
                summary.interrupted = true;
                tracing::info!("Warm-up interrupted after {} samples", summary.samples);
                break;
            }

            let troubled = faulty_region.as_deref() == Some(entity.region.as_str())
                && rng.gen_bool(REGIONAL_IMPACT);
            if troubled {
                summary.troubled += 1;
            }

            let lock = self.entity_lock(entity.id);
            let _guard = lock.lock().await;

            let missing = capacity.saturating_sub(self.window.size(entity.id));
            for index in (capacity - missing)..capacity {
                let now = self.clock.now();
                let sample = self
                    .telemetry
                    .bootstrap_sample(entity, troubled && index >= TROUBLE_FROM);
                let reading = read_sample(sample, entity.id, now);
                self.window.add(entity.id, reading.snapshot);
                summary.samples += 1;
            }
        }

        summary.faulty_region = faulty_region;
        tracing::info!(
            "Warm-up done: {} samples, {} troubled entities",
            summary.samples,
            summary.troubled
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::EngineConfig;
    use crate::db::{Entity, Store};
    use crate::engine::EngineDeps;
    use crate::notify::LogNotifier;
    use crate::telemetry::{Simulator, SimulatorConfig};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn engine(tmp: &NamedTempFile, count: i64, fault_probability: f64) -> Engine {
        let store = Store::new(tmp.path()).unwrap();
        let entities: Vec<Entity> = (1..=count)
            .map(|id| Entity {
                id,
                name: format!("Subscriber {:04}", id),
                region: "Region_3".to_string(),
                ..Entity::default()
            })
            .collect();
        store.add_entities(&entities).unwrap();

        let config = EngineConfig {
            warmup_fault_probability: fault_probability,
            ..EngineConfig::default()
        };
        let quiet = SimulatorConfig {
            individual_fault_probability: 0.0,
            regional_fault_probability: 0.0,
            ..SimulatorConfig::default()
        };
        Engine::new(
            config,
            EngineDeps {
                store: Arc::new(store),
                telemetry: Arc::new(Simulator::with_seed(quiet, 7)),
                notifier: Arc::new(LogNotifier),
                clock: Arc::new(SystemClock),
                snapshot_model: None,
                trend_model: None,
            },
        )
    }

    #[tokio::test]
    async fn test_fills_every_window() {
        let tmp = NamedTempFile::new().unwrap();
        let engine = engine(&tmp, 10, 0.0);
        let summary = engine.warm_up_with(&mut StdRng::seed_from_u64(1)).await.unwrap();

        assert_eq!(summary.samples, 120);
        assert!(summary.faulty_region.is_none());
        for id in 1..=10 {
            assert!(engine.window().status(id).is_ready);
            assert!(engine.window().get(id).iter().all(|s| s.packet_loss_ratio < 1.0));
        }
        // Warm-up never touches status records.
        assert!(engine.store.get_statuses().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regional_fault_pattern() {
        let tmp = NamedTempFile::new().unwrap();
        let engine = engine(&tmp, 20, 1.0);
        let summary = engine.warm_up_with(&mut StdRng::seed_from_u64(3)).await.unwrap();

        assert_eq!(summary.faulty_region.as_deref(), Some("Region_3"));
        assert!(summary.troubled > 0);

        let mut troubled = 0;
        for id in 1..=20 {
            let window = engine.window().get(id);
            assert!(window[..TROUBLE_FROM].iter().all(|s| s.packet_loss_ratio < 1.0));
            if window[TROUBLE_FROM..].iter().all(|s| s.packet_loss_ratio >= 10.0) {
                troubled += 1;
            }
        }
        assert_eq!(troubled, summary.troubled);
    }

    #[tokio::test]
    async fn test_second_warm_up_only_tops_up() {
        let tmp = NamedTempFile::new().unwrap();
        let engine = engine(&tmp, 2, 0.0);
        engine.warm_up_with(&mut StdRng::seed_from_u64(1)).await.unwrap();
        let summary = engine.warm_up_with(&mut StdRng::seed_from_u64(1)).await.unwrap();
        assert_eq!(summary.samples, 0);
    }

    #[tokio::test]
    async fn test_nan_fault_probability_means_no_regional_fault() {
        let tmp = NamedTempFile::new().unwrap();
        let engine = engine(&tmp, 4, f64::NAN);
        let summary = engine.warm_up_with(&mut StdRng::seed_from_u64(9)).await.unwrap();
        assert!(summary.faulty_region.is_none());
        assert_eq!(summary.samples, 48);
    }

    #[tokio::test]
    async fn test_stopped_engine_skips_warm_up() {
        let tmp = NamedTempFile::new().unwrap();
        let engine = engine(&tmp, 3, 0.0);
        engine.shutdown();
        let summary = engine.warm_up_with(&mut StdRng::seed_from_u64(1)).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(engine.window().total_len(), 0);
    }
}
