use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

// Broker service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    // Control-plane TCP listener bind address.
    pub bind: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Max frame size accepted on control connections.
    pub max_frame_bytes: usize,
    // Number of notification delivery workers.
    pub notify_workers: usize,
    // Pending-delivery queue depth; overflow drops deliveries.
    pub notify_queue_depth: usize,
    // Per-delivery timeout covering connect and write.
    pub notify_timeout_ms: u64,
}

const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_NOTIFY_WORKERS: usize = 8;
const DEFAULT_NOTIFY_QUEUE_DEPTH: usize = 1024;
const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Deserialize)]
struct BrokerConfigOverride {
    bind: Option<String>,
    metrics_bind: Option<String>,
    max_frame_bytes: Option<usize>,
    notify_workers: Option<usize>,
    notify_queue_depth: Option<usize>,
    notify_timeout_ms: Option<u64>,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind = std::env::var("HERALD_BIND")
            .unwrap_or_else(|_| "127.0.0.1:3333".to_string())
            .parse()
            .with_context(|| "parse HERALD_BIND")?;
        let metrics_bind = std::env::var("HERALD_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse HERALD_METRICS_BIND")?;
        let max_frame_bytes = std::env::var("HERALD_MAX_FRAME_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);
        let notify_workers = std::env::var("HERALD_NOTIFY_WORKERS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_NOTIFY_WORKERS);
        let notify_queue_depth = std::env::var("HERALD_NOTIFY_QUEUE_DEPTH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_NOTIFY_QUEUE_DEPTH);
        let notify_timeout_ms = std::env::var("HERALD_NOTIFY_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_MS);
        Ok(Self {
            bind,
            metrics_bind,
            max_frame_bytes,
            notify_workers,
            notify_queue_depth,
            notify_timeout_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HERALD_BROKER_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read HERALD_BROKER_CONFIG: {path}"))?;
            let override_cfg: BrokerConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse broker config yaml")?;
            if let Some(value) = override_cfg.bind {
                config.bind = value.parse().with_context(|| "parse bind")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.max_frame_bytes
                && value > 0
            {
                config.max_frame_bytes = value;
            }
            if let Some(value) = override_cfg.notify_workers
                && value > 0
            {
                config.notify_workers = value;
            }
            if let Some(value) = override_cfg.notify_queue_depth
                && value > 0
            {
                config.notify_queue_depth = value;
            }
            if let Some(value) = override_cfg.notify_timeout_ms
                && value > 0
            {
                config.notify_timeout_ms = value;
            }
        }
        Ok(config)
    }
}
