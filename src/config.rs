//! Configuration management
//!
//! All knobs are environment-driven with sensible server defaults.

use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Number of workers per application pool
    pub pool_size: usize,
    /// Maximum selection probes before a dispatch is declared exhausted
    pub dispatch_probes: usize,
    /// How long a dispatch waits for a worker to publish its result
    pub handoff_timeout_ms: u64,
    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
    /// Applications registered (and connected) at startup
    pub applications: Vec<String>,
    /// Server port
    pub server_port: u16,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok(); // Load .env if present

        Self {
            pool_size: env::var("POOL_SIZE")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),

            dispatch_probes: env::var("DISPATCH_PROBES")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(100),

            handoff_timeout_ms: env::var("HANDOFF_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),

            max_body_bytes: env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024), // 10MB

            applications: env::var("APPLICATIONS")
                .unwrap_or_else(|_| "demo".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}
