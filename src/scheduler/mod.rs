//! Scheduler module for running the periodic population sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::engine::Engine;

/// Runs warm-up once, then sweeps the population on a fixed interval.
pub struct Scheduler {
    engine: Arc<Engine>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            handle: Mutex::new(None),
        }
    }

    /// Start the background sweep task.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return; // Already running
        }

        tracing::info!("Starting scheduler, sweeping every {:?}", self.interval);
        *handle = Some(tokio::spawn(run_sweep_loop(self.engine.clone(), self.interval)));
    }

    /// Signal the engine to stop and wait for the current entity updates to finish.
    pub async fn stop(&self) {
        self.engine.shutdown();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn run_sweep_loop(engine: Arc<Engine>, period: Duration) {
    let mut stop_rx = engine.subscribe_stop();
    if engine.is_stopping() {
        return;
    }

    tokio::select! {
        _ = stop_rx.recv() => return,
        result = engine.warm_up() => match result {
            Ok(summary) if summary.interrupted => return,
            Ok(_) => {}
            Err(e) => tracing::error!("Warm-up failed: {}", e),
        },
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                // The sweep checks the stop flag between entities itself.
                if let Err(e) = engine.sweep_once().await {
                    tracing::error!("Sweep failed: {}", e);
                }
                if engine.is_stopping() {
                    break;
                }
            }
        }
    }
}
