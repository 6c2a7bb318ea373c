//! Status decision engine.
//!
//! Every evaluation, whether from the periodic sweep or an on-demand query,
//! runs the same per-entity pipeline under that entity's lock:
//! telemetry, window preview, both predictors, fusion, state machine, alert.
//! The window only advances once the state machine update is stored.

mod tickets;
mod warmup;

pub use tickets::*;
pub use warmup::*;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{Category, CategoryCounts, DbError, Entity, EntityId, StatusRecord, StatusStore, TicketId};
use crate::fusion::{EnsembleFusion, FusionResult, Signal};
use crate::notify::{AlertContext, NotificationOutcome, NotificationTrigger, Notifier};
use crate::predict::{
    ClassModel, PredictionResult, PredictorOutcome, SnapshotPredictor, TrendAnalysis, TrendPredictor,
};
use crate::status::{Permission, StatusStateMachine, Transition};
use crate::telemetry::{read_sample, MetricSnapshot, TelemetrySource};
use crate::window::{RollingWindowCache, WindowStatus};

/// Engine error types.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("unknown ticket {0}")]
    UnknownTicket(TicketId),
    #[error("ticket {0} is closed")]
    TicketClosed(TicketId),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("store error: {0}")]
    Store(#[from] DbError),
    #[error("engine is shutting down")]
    Stopped,
}

/// Collaborators the engine is assembled from.
pub struct EngineDeps {
    pub store: Arc<dyn StatusStore>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub snapshot_model: Option<Arc<dyn ClassModel>>,
    pub trend_model: Option<Arc<dyn ClassModel>>,
}

/// Everything one evaluation saw and decided.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub entity: Entity,
    pub snapshot: MetricSnapshot,
    pub snapshot_prediction: PredictionResult,
    pub trend_prediction: PredictorOutcome,
    pub fusion: FusionResult,
    /// The fused category before hysteresis.
    pub proposed: Category,
    /// The category presented to callers.
    pub category: Category,
    pub transition: Transition,
    pub permission: Permission,
    pub status: StatusRecord,
    pub notification: NotificationOutcome,
    pub window: WindowStatus,
}

/// Totals of one full-population sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub evaluated: usize,
    pub failed: usize,
    /// Entities not reached because the engine was stopping.
    pub skipped: usize,
    pub transitions: usize,
    pub notifications: usize,
    pub counts: CategoryCounts,
    pub duration_ms: u64,
}

/// An entity with its current decision state.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    #[serde(flatten)]
    pub entity: Entity,
    pub category: Category,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub fault_type: Option<String>,
    pub estimated_fix_time: Option<DateTime<Utc>>,
}

/// Stored decision state of one entity, without a fresh evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub record: StatusRecord,
    /// Whether a return to GREEN would be accepted right now.
    pub recovery: Permission,
}

/// Trend view of one entity.
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub entity_id: EntityId,
    pub window: WindowStatus,
    pub prediction: PredictorOutcome,
    pub analysis: Option<TrendAnalysis>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn StatusStore>,
    telemetry: Arc<dyn TelemetrySource>,
    clock: Arc<dyn Clock>,
    window: Arc<RollingWindowCache>,
    snapshot: SnapshotPredictor,
    trend: TrendPredictor,
    fusion: EnsembleFusion,
    machine: StatusStateMachine,
    trigger: NotificationTrigger,
    locks: DashMap<EntityId, Arc<Mutex<()>>>,
    semaphore: Arc<Semaphore>,
    stopping: AtomicBool,
    stop_tx: broadcast::Sender<()>,
}

impl Engine {
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Self {
        let window = Arc::new(RollingWindowCache::new(config.window_capacity));
        let (stop_tx, _) = broadcast::channel(1);

        Self {
            snapshot: SnapshotPredictor::new(deps.snapshot_model, config.predictor_timeout),
            trend: TrendPredictor::new(window.clone(), deps.trend_model, config.predictor_timeout),
            fusion: EnsembleFusion::new(config.fusion),
            machine: StatusStateMachine::new(deps.store.clone(), deps.clock.clone(), config.status.clone()),
            trigger: NotificationTrigger::new(deps.notifier),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            store: deps.store,
            telemetry: deps.telemetry,
            clock: deps.clock,
            window,
            locks: DashMap::new(),
            stopping: AtomicBool::new(false),
            stop_tx,
            config,
        }
    }

    pub fn window(&self) -> &RollingWindowCache {
        &self.window
    }

    pub fn predictors_available(&self) -> (bool, bool) {
        (self.snapshot.is_available(), self.trend.is_available())
    }

    /// Ask running sweeps and warm-up to stop between entities.
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            tracing::info!("Engine stopping");
        }
        let _ = self.stop_tx.send(());
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn subscribe_stop(&self) -> broadcast::Receiver<()> {
        self.stop_tx.subscribe()
    }

    fn entity_lock(&self, entity_id: EntityId) -> Arc<Mutex<()>> {
        self.locks
            .entry(entity_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn entity(&self, entity_id: EntityId) -> Result<Entity, EngineError> {
        self.store.get_entity(entity_id).map_err(|e| match e {
            DbError::NotFound => EngineError::UnknownEntity(entity_id),
            other => EngineError::Store(other),
        })
    }

    /// Evaluate one entity now.
    pub async fn evaluate_one(&self, entity_id: EntityId) -> Result<Evaluation, EngineError> {
        let entity = self.entity(entity_id)?;
        self.evaluate_entity(entity).await
    }

    async fn evaluate_entity(&self, entity: Entity) -> Result<Evaluation, EngineError> {
        let lock = self.entity_lock(entity.id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let reading = read_sample(
            self.telemetry.sample(entity.id, &entity.plan_tier),
            entity.id,
            now,
        );
        let preview = self.window.preview(entity.id, &reading.snapshot);

        let (snapshot_prediction, trend_prediction) = tokio::join!(
            self.snapshot.predict(&reading.snapshot),
            self.trend.predict_window(&preview)
        );

        let fusion = self.fusion.combine_outcomes(
            &snapshot_prediction,
            &trend_prediction,
            reading.degraded.as_deref(),
        );
        let fault_type = (fusion.category != Category::Green).then(|| infer_fault_type(&reading.snapshot));

        let outcome = self
            .machine
            .update(entity.id, fusion.category, fault_type, None)?;
        self.window.add(entity.id, reading.snapshot.clone());

        let class_code = match fusion.dominant {
            Signal::Snapshot => snapshot_prediction.class_code,
            Signal::Trend => trend_prediction.result().map(|r| r.class_code).unwrap_or(0),
            Signal::None => 0,
        };

        let mut status = outcome.record;
        let notification = self
            .trigger
            .process(
                &self.machine,
                &mut status,
                &AlertContext {
                    entity: &entity,
                    fusion: &fusion,
                    class_code,
                },
            )
            .await;

        Ok(Evaluation {
            window: self.window.status(entity.id),
            category: status.current_category,
            proposed: outcome.proposed,
            transition: outcome.transition,
            permission: outcome.permission,
            entity,
            snapshot: reading.snapshot,
            snapshot_prediction,
            trend_prediction,
            fusion,
            status,
            notification,
        })
    }

    /// Evaluate the whole population once.
    ///
    /// Entities are independent: one failing entity is logged and counted,
    /// the rest of the sweep carries on.
    pub async fn sweep_once(self: &Arc<Self>) -> Result<SweepSummary, EngineError> {
        let started = Instant::now();
        let entities = self.store.get_entities()?;
        self.telemetry.begin_cycle(&entities);

        let mut summary = SweepSummary::default();
        let mut tasks = JoinSet::new();
        let total = entities.len();

        for (index, entity) in entities.into_iter().enumerate() {
            if self.is_stopping() {
                summary.skipped = total - index;
                break;
            }
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                summary.skipped = total - index;
                break;
            };

            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let entity_id = entity.id;
                (entity_id, engine.evaluate_entity(entity).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(evaluation))) => {
                    summary.evaluated += 1;
                    summary.counts.add(evaluation.category);
                    if evaluation.transition != Transition::None {
                        summary.transitions += 1;
                    }
                    if matches!(evaluation.notification, NotificationOutcome::Sent { .. }) {
                        summary.notifications += 1;
                    }
                }
                Ok((entity_id, Err(e))) => {
                    tracing::warn!("Skipping entity {} this cycle: {}", entity_id, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Evaluation task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Sweep done: {} evaluated, {} failed, {} skipped, {} transitions, {} alerts ({}ms)",
            summary.evaluated,
            summary.failed,
            summary.skipped,
            summary.transitions,
            summary.notifications,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Current record of one entity, created GREEN if never evaluated.
    pub async fn current_status(&self, entity_id: EntityId) -> Result<StatusView, EngineError> {
        self.entity(entity_id)?;
        let lock = self.entity_lock(entity_id);
        let _guard = lock.lock().await;
        let record = self.machine.current(entity_id)?;
        let recovery = self.machine.should_allow(entity_id, Category::Green)?;
        Ok(StatusView { record, recovery })
    }

    /// Entities per category. Entities never evaluated count as GREEN.
    pub fn population_counts(&self) -> Result<CategoryCounts, EngineError> {
        let categories = self.categories()?;
        let mut counts = CategoryCounts::default();
        for (_, record) in categories {
            counts.add(record.map(|r| r.current_category).unwrap_or(Category::Green));
        }
        Ok(counts)
    }

    fn categories(&self) -> Result<Vec<(Entity, Option<StatusRecord>)>, EngineError> {
        let entities = self.store.get_entities()?;
        let mut statuses: BTreeMap<EntityId, StatusRecord> = self
            .store
            .get_statuses()?
            .into_iter()
            .map(|r| (r.entity_id, r))
            .collect();

        Ok(entities
            .into_iter()
            .map(|e| {
                let record = statuses.remove(&e.id);
                (e, record)
            })
            .collect())
    }

    /// Entities grouped by current category.
    pub fn list_by_category(&self) -> Result<BTreeMap<Category, Vec<EntitySummary>>, EngineError> {
        let mut groups: BTreeMap<Category, Vec<EntitySummary>> =
            Category::ALL.iter().map(|c| (*c, Vec::new())).collect();

        for (entity, record) in self.categories()? {
            let category = record
                .as_ref()
                .map(|r| r.current_category)
                .unwrap_or(Category::Green);
            let summary = EntitySummary {
                entity,
                category,
                status_changed_at: record.as_ref().map(|r| r.status_changed_at),
                fault_type: record.as_ref().and_then(|r| r.fault_type.clone()),
                estimated_fix_time: record.as_ref().and_then(|r| r.estimated_fix_time),
            };
            groups.entry(category).or_default().push(summary);
        }

        Ok(groups)
    }

    /// Trend prediction and heuristic analysis of an entity's window.
    pub async fn trend(&self, entity_id: EntityId) -> Result<TrendReport, EngineError> {
        self.entity(entity_id)?;
        Ok(TrendReport {
            entity_id,
            window: self.window.status(entity_id),
            prediction: self.trend.predict(entity_id).await,
            analysis: self.trend.analyze_trend(entity_id),
        })
    }

    /// Force every status record back to GREEN.
    ///
    /// Holds every entity lock so no evaluation interleaves with the reset.
    pub async fn reset_all(&self) -> Result<usize, EngineError> {
        let entities = self.store.get_entities()?;
        let locks: Vec<Arc<Mutex<()>>> = entities.iter().map(|e| self.entity_lock(e.id)).collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.lock().await);
        }
        Ok(self.machine.reset_all()?)
    }
}

/// Best-guess fault label for a degraded snapshot.
pub fn infer_fault_type(snapshot: &MetricSnapshot) -> &'static str {
    if snapshot.packet_loss_ratio > 5.0 {
        "packet_loss"
    } else if snapshot.latency_ms > 150.0 || snapshot.jitter_ms > 50.0 {
        "ping_high"
    } else if snapshot.snr_margin_db < 10.0 || snapshot.signal_quality < -80.0 {
        "line_fault"
    } else {
        "network_degradation"
    }
}
