//! Configuration module for linewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::fusion::FusionConfig;
use crate::status::StatusConfig;

/// Which notifier delivers alert messages.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifierKind {
    /// Only log the message.
    Log,
    /// POST a JSON payload to a generic webhook.
    Webhook { url: String },
    /// Send through the Telegram bot API.
    Telegram { token: String, chat_id: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the query surface (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "linewatch.db")
    pub db_path: String,
    /// Number of entities seeded into an empty database (default: 500)
    pub population: usize,
    /// Seconds between full-population sweeps (default: 300)
    pub sweep_interval: Duration,
    /// Path to the snapshot classifier artifact
    pub snapshot_artifact: String,
    /// Path to the trend classifier artifact
    pub trend_artifact: String,
    pub notifier: NotifierKind,
    /// Fixed seed for the telemetry simulator, for reproducible runs
    pub simulator_seed: Option<u64>,
    pub engine: EngineConfig,
}

/// Tunables of the status decision engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rolling window length per entity (default: 12)
    pub window_capacity: usize,
    pub fusion: FusionConfig,
    pub status: StatusConfig,
    /// Upper bound on a single model inference (default: 2s)
    pub predictor_timeout: Duration,
    /// Entities evaluated concurrently during a sweep (default: 64)
    pub max_concurrency: usize,
    /// Probability that warm-up injects a regional fault (default: 0.05)
    pub warmup_fault_probability: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: 12,
            fusion: FusionConfig::default(),
            status: StatusConfig::default(),
            predictor_timeout: Duration::from_secs(2),
            max_concurrency: 64,
            warmup_fault_probability: 0.05,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "linewatch.db".to_string(),
            population: 500,
            sweep_interval: Duration::from_secs(300),
            snapshot_artifact: "models/snapshot.json".to_string(),
            trend_artifact: "models/trend.json".to_string(),
            notifier: NotifierKind::Log,
            simulator_seed: None,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LINEWATCH_HTTP_PORT`, `LINEWATCH_DB_PATH`, `LINEWATCH_POPULATION`
    /// - `LINEWATCH_SWEEP_INTERVAL_SECS`
    /// - `LINEWATCH_SNAPSHOT_ARTIFACT`, `LINEWATCH_TREND_ARTIFACT`
    /// - `LINEWATCH_WINDOW_CAPACITY`, `LINEWATCH_PREDICTOR_TIMEOUT_MS`, `LINEWATCH_MAX_CONCURRENCY`
    /// - `LINEWATCH_WARMUP_FAULT_PROBABILITY`, `LINEWATCH_SIMULATOR_SEED`
    /// - `LINEWATCH_SNAPSHOT_WEIGHT`, `LINEWATCH_TREND_WEIGHT`
    /// - `LINEWATCH_RED_THRESHOLD`, `LINEWATCH_YELLOW_THRESHOLD`
    /// - `LINEWATCH_RED_DWELL_SECS`, `LINEWATCH_YELLOW_DWELL_SECS`
    /// - `LINEWATCH_NOTIFIER` (`log`, `webhook`, `telegram`), `LINEWATCH_WEBHOOK_URL`,
    ///   `LINEWATCH_TELEGRAM_TOKEN`, `LINEWATCH_TELEGRAM_CHAT_ID`
    pub fn load() -> Self {
        let mut cfg = Self::default();

        cfg.http_port = env_parse("LINEWATCH_HTTP_PORT", cfg.http_port);
        if let Ok(db_path) = env::var("LINEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        cfg.population = env_parse("LINEWATCH_POPULATION", cfg.population);
        cfg.sweep_interval = Duration::from_secs(
            env_parse("LINEWATCH_SWEEP_INTERVAL_SECS", cfg.sweep_interval.as_secs()).max(1),
        );
        if let Ok(path) = env::var("LINEWATCH_SNAPSHOT_ARTIFACT") {
            cfg.snapshot_artifact = path;
        }
        if let Ok(path) = env::var("LINEWATCH_TREND_ARTIFACT") {
            cfg.trend_artifact = path;
        }
        cfg.notifier = load_notifier();
        if let Ok(raw) = env::var("LINEWATCH_SIMULATOR_SEED") {
            match raw.parse() {
                Ok(seed) => cfg.simulator_seed = Some(seed),
                Err(_) => tracing::warn!("Ignoring invalid LINEWATCH_SIMULATOR_SEED={:?}", raw),
            }
        }

        let engine = &mut cfg.engine;
        engine.window_capacity = env_parse("LINEWATCH_WINDOW_CAPACITY", engine.window_capacity).max(1);
        engine.predictor_timeout = Duration::from_millis(env_parse(
            "LINEWATCH_PREDICTOR_TIMEOUT_MS",
            engine.predictor_timeout.as_millis() as u64,
        ));
        engine.max_concurrency = env_parse("LINEWATCH_MAX_CONCURRENCY", engine.max_concurrency).max(1);
        engine.warmup_fault_probability = env_parse_finite(
            "LINEWATCH_WARMUP_FAULT_PROBABILITY",
            engine.warmup_fault_probability,
        )
        .clamp(0.0, 1.0);

        let fusion = &mut engine.fusion;
        fusion.snapshot_weight = env_parse_finite("LINEWATCH_SNAPSHOT_WEIGHT", fusion.snapshot_weight);
        fusion.trend_weight = env_parse_finite("LINEWATCH_TREND_WEIGHT", fusion.trend_weight);
        fusion.red_threshold = env_parse_finite("LINEWATCH_RED_THRESHOLD", fusion.red_threshold);
        fusion.yellow_threshold = env_parse_finite("LINEWATCH_YELLOW_THRESHOLD", fusion.yellow_threshold);
        if fusion.yellow_threshold >= fusion.red_threshold {
            tracing::warn!(
                "Yellow threshold {} is not below red threshold {}, using defaults",
                fusion.yellow_threshold,
                fusion.red_threshold
            );
            let defaults = FusionConfig::default();
            fusion.yellow_threshold = defaults.yellow_threshold;
            fusion.red_threshold = defaults.red_threshold;
        }

        let status = &mut engine.status;
        status.red_dwell = Duration::from_secs(env_parse(
            "LINEWATCH_RED_DWELL_SECS",
            status.red_dwell.as_secs(),
        ));
        status.yellow_dwell = Duration::from_secs(env_parse(
            "LINEWATCH_YELLOW_DWELL_SECS",
            status.yellow_dwell.as_secs(),
        ));

        cfg
    }
}

fn load_notifier() -> NotifierKind {
    let kind = env::var("LINEWATCH_NOTIFIER").unwrap_or_default();
    match kind.as_str() {
        "webhook" => match env::var("LINEWATCH_WEBHOOK_URL") {
            Ok(url) => NotifierKind::Webhook { url },
            Err(_) => {
                tracing::warn!("LINEWATCH_WEBHOOK_URL missing, notifications will only be logged");
                NotifierKind::Log
            }
        },
        "telegram" => match (
            env::var("LINEWATCH_TELEGRAM_TOKEN"),
            env::var("LINEWATCH_TELEGRAM_CHAT_ID"),
        ) {
            (Ok(token), Ok(chat_id)) => NotifierKind::Telegram { token, chat_id },
            _ => {
                tracing::warn!("Telegram credentials missing, notifications will only be logged");
                NotifierKind::Log
            }
        },
        "" | "log" => NotifierKind::Log,
        other => {
            tracing::warn!("Unknown notifier '{}', notifications will only be logged", other);
            NotifierKind::Log
        }
    }
}

/// Parse an environment variable, keeping `default` when it is unset or invalid.
fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Like [`env_parse`], but NaN and infinities are rejected as well.
fn env_parse_finite(key: &str, default: f64) -> f64 {
    let value = env_parse(key, default);
    if value.is_finite() {
        value
    } else {
        tracing::warn!("Ignoring non-finite {}={}, using {}", key, value, default);
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "linewatch.db");
        assert_eq!(cfg.population, 500);
        assert_eq!(cfg.sweep_interval, Duration::from_secs(300));
        assert_eq!(cfg.notifier, NotifierKind::Log);
        assert_eq!(cfg.simulator_seed, None);
    }

    #[test]
    fn test_default_engine_config() {
        let engine = EngineConfig::default();
        assert_eq!(engine.window_capacity, 12);
        assert_eq!(engine.fusion.snapshot_weight, 0.6);
        assert_eq!(engine.fusion.trend_weight, 0.4);
        assert_eq!(engine.status.red_dwell, Duration::from_secs(600));
        assert_eq!(engine.status.yellow_dwell, Duration::from_secs(300));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        env::set_var("LINEWATCH_TEST_ENV_PARSE", "not-a-number");
        assert_eq!(env_parse("LINEWATCH_TEST_ENV_PARSE", 7u32), 7);
        env::set_var("LINEWATCH_TEST_ENV_PARSE", "42");
        assert_eq!(env_parse("LINEWATCH_TEST_ENV_PARSE", 7u32), 42);
        env::remove_var("LINEWATCH_TEST_ENV_PARSE");
        assert_eq!(env_parse("LINEWATCH_TEST_ENV_PARSE", 7u32), 7);
    }

    #[test]
    fn test_non_finite_floats_keep_defaults() {
        env::set_var("LINEWATCH_TEST_ENV_FINITE", "NaN");
        assert_eq!(env_parse_finite("LINEWATCH_TEST_ENV_FINITE", 0.25), 0.25);
        env::set_var("LINEWATCH_TEST_ENV_FINITE", "inf");
        assert_eq!(env_parse_finite("LINEWATCH_TEST_ENV_FINITE", 0.25), 0.25);
        env::set_var("LINEWATCH_TEST_ENV_FINITE", "0.5");
        assert_eq!(env_parse_finite("LINEWATCH_TEST_ENV_FINITE", 0.25), 0.5);
        env::remove_var("LINEWATCH_TEST_ENV_FINITE");
    }

    #[test]
    fn test_load_rejects_nan_probability_and_thresholds() {
        env::set_var("LINEWATCH_WARMUP_FAULT_PROBABILITY", "NaN");
        env::set_var("LINEWATCH_RED_THRESHOLD", "NaN");
        env::set_var("LINEWATCH_TREND_WEIGHT", "-inf");
        env::set_var("LINEWATCH_SIMULATOR_SEED", "1234");
        let cfg = ServerConfig::load();
        env::remove_var("LINEWATCH_SIMULATOR_SEED");
        env::remove_var("LINEWATCH_WARMUP_FAULT_PROBABILITY");
        env::remove_var("LINEWATCH_RED_THRESHOLD");
        env::remove_var("LINEWATCH_TREND_WEIGHT");

        let defaults = EngineConfig::default();
        assert_eq!(cfg.engine.warmup_fault_probability, defaults.warmup_fault_probability);
        assert_eq!(cfg.engine.fusion.red_threshold, defaults.fusion.red_threshold);
        assert_eq!(cfg.engine.fusion.trend_weight, defaults.fusion.trend_weight);
        assert_eq!(cfg.simulator_seed, Some(1234));
    }
}
