//! Randomized telemetry generator standing in for a live line collector.
//!
//! Produces plausible snapshots per plan tier and injects individual and
//! regional faults so the decision engine sees realistic degradations.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{MetricSnapshot, TelemetryError, TelemetrySource};
use crate::db::{Entity, EntityId};

/// Fault injection rates.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Chance that any entity is troubled on a sweep sample.
    pub individual_fault_probability: f64,
    /// Chance that a sweep picks one faulty region.
    pub regional_fault_probability: f64,
    /// Share of a faulty region's entities that are affected.
    pub regional_impact: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            individual_fault_probability: 0.05,
            regional_fault_probability: 0.03,
            regional_impact: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FaultScenario {
    Latency,
    Throughput,
    Loss,
}

struct SimState {
    rng: StdRng,
    regions: HashMap<EntityId, String>,
    faulty_region: Option<String>,
}

/// Telemetry simulator.
pub struct Simulator {
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self::from_rng(config, StdRng::from_entropy())
    }

    /// Deterministic simulator for reproducible runs.
    pub fn with_seed(config: SimulatorConfig, seed: u64) -> Self {
        Self::from_rng(config, StdRng::seed_from_u64(seed))
    }

    fn from_rng(config: SimulatorConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: Mutex::new(SimState {
                rng,
                regions: HashMap::new(),
                faulty_region: None,
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, TelemetryError> {
        self.state
            .lock()
            .map_err(|_| TelemetryError::Unavailable("simulator state poisoned".to_string()))
    }
}

impl TelemetrySource for Simulator {
    fn sample(&self, entity_id: EntityId, plan_tier: &str) -> Result<MetricSnapshot, TelemetryError> {
        let mut state = self.lock()?;
        let SimState {
            rng,
            regions,
            faulty_region,
        } = &mut *state;

        let in_faulty_region = match (faulty_region.as_ref(), regions.get(&entity_id)) {
            (Some(faulty), Some(region)) => faulty == region,
            _ => false,
        };
        let troubled = if in_faulty_region {
            rng.gen_bool(self.config.regional_impact)
        } else {
            rng.gen_bool(self.config.individual_fault_probability)
        };

        let scenario = if troubled {
            [FaultScenario::Latency, FaultScenario::Throughput, FaultScenario::Loss]
                .choose(rng)
                .copied()
        } else {
            None
        };

        Ok(generate(rng, entity_id, plan_tier, scenario))
    }

    fn begin_cycle(&self, population: &[Entity]) {
        let Ok(mut state) = self.lock() else {
            return;
        };

        state.regions = population
            .iter()
            .map(|e| (e.id, e.region.clone()))
            .collect();

        let mut all_regions: Vec<&String> = population.iter().map(|e| &e.region).collect();
        all_regions.sort();
        all_regions.dedup();

        let faulty = if state.rng.gen_bool(self.config.regional_fault_probability) {
            all_regions.choose(&mut state.rng).map(|r| r.to_string())
        } else {
            None
        };

        if let Some(region) = &faulty {
            tracing::warn!("Simulating regional fault in {}", region);
        }
        state.faulty_region = faulty;
    }

    fn bootstrap_sample(&self, entity: &Entity, troubled: bool) -> Result<MetricSnapshot, TelemetryError> {
        let mut state = self.lock()?;
        let scenario = troubled.then_some(FaultScenario::Loss);
        Ok(generate(&mut state.rng, entity.id, &entity.plan_tier, scenario))
    }
}

fn plan_throughput(rng: &mut StdRng, plan_tier: &str) -> f64 {
    if plan_tier.contains("1000") {
        rng.gen_range(800.0..1000.0)
    } else if plan_tier.contains("100") {
        rng.gen_range(80.0..100.0)
    } else {
        rng.gen_range(20.0..50.0)
    }
}

fn generate(
    rng: &mut StdRng,
    entity_id: EntityId,
    plan_tier: &str,
    scenario: Option<FaultScenario>,
) -> MetricSnapshot {
    let mut snapshot = MetricSnapshot {
        entity_id,
        latency_ms: rng.gen_range(10.0..50.0),
        packet_loss_ratio: rng.gen_range(0.0..0.05),
        jitter_ms: rng.gen_range(1.0..10.0),
        throughput_mbps: plan_throughput(rng, plan_tier),
        signal_quality: rng.gen_range(-60.0..-30.0),
        snr_margin_db: rng.gen_range(20.0..35.0),
        timestamp: Utc::now(),
    };

    match scenario {
        Some(FaultScenario::Latency) => {
            snapshot.latency_ms = rng.gen_range(150.0..400.0);
            snapshot.jitter_ms = rng.gen_range(50.0..150.0);
        }
        Some(FaultScenario::Throughput) => {
            snapshot.throughput_mbps = rng.gen_range(1.0..10.0);
        }
        Some(FaultScenario::Loss) => {
            snapshot.packet_loss_ratio = rng.gen_range(10.0..40.0);
            snapshot.signal_quality = rng.gen_range(-90.0..-80.0);
            snapshot.snr_margin_db = rng.gen_range(3.0..8.0);
        }
        None => {}
    }

    snapshot
}
