//! linewatch - subscriber line status decision engine.
//!
//! Samples line telemetry, fuses a snapshot and a trend classifier into a
//! traffic-light category, and alerts on status changes with hysteresis.

mod clock;
mod config;
mod db;
mod engine;
mod fusion;
mod notify;
mod predict;
mod scheduler;
mod status;
mod telemetry;
mod web;
mod window;

use clock::SystemClock;
use config::ServerConfig;
use db::{Entity, StatusStore, Store};
use engine::{Engine, EngineDeps};
use scheduler::Scheduler;
use telemetry::{Simulator, SimulatorConfig};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PLAN_TIERS: [&str; 3] = ["24 Mbps DSL", "100 Mbps Fiber", "1000 Mbps Gamer"];
const REGIONS: usize = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("linewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting linewatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Seed the monitored population on first start
    if store.get_entities()?.is_empty() {
        tracing::info!("Seeding {} subscribers", cfg.population);
        store.add_entities(&seed_population(cfg.population))?;
    }

    let notifier = notify::build_notifier(&cfg.notifier)?;
    tracing::info!("Alerts delivered via {}", notifier.name());

    let simulator = match cfg.simulator_seed {
        Some(seed) => {
            tracing::info!("Telemetry simulator seeded with {}", seed);
            Simulator::with_seed(SimulatorConfig::default(), seed)
        }
        None => Simulator::new(SimulatorConfig::default()),
    };

    let engine = Arc::new(Engine::new(
        cfg.engine.clone(),
        EngineDeps {
            store: store.clone(),
            telemetry: Arc::new(simulator),
            notifier,
            clock: Arc::new(SystemClock),
            snapshot_model: predict::load_model(&cfg.snapshot_artifact),
            trend_model: predict::load_model(&cfg.trend_artifact),
        },
    ));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(engine.clone(), cfg.sweep_interval));
    scheduler.start().await;

    // Start web server, stopping everything on Ctrl-C
    let server = Server::new(cfg.http_port, engine);
    let stopper = scheduler.clone();
    server
        .start(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
            stopper.stop().await;
        })
        .await?;

    Ok(())
}

fn seed_population(count: usize) -> Vec<Entity> {
    (1..=count)
        .map(|n| Entity {
            id: n as i64,
            name: format!("Subscriber {:04}", n),
            plan_tier: PLAN_TIERS[n % PLAN_TIERS.len()].to_string(),
            region: format!("Region_{}", (n % REGIONS) + 1),
        })
        .collect()
}
