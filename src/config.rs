//! Environment-driven operational configuration.

use std::time::Duration;

use crate::queue::redis::RetryPolicy;

/// Which queue backend the process runs; bound once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    #[default]
    Memory,
    Redis,
}

/// Worker configuration.
///
/// Environment variables:
/// - `EXPORT_QUEUE`: `memory` or `redis` (default: memory)
/// - `REDIS_URL`: Redis connection string (default: redis://127.0.0.1/)
/// - `RENDER_SERVICE_URL`: render service base URL (default: http://localhost:8000)
/// - `EXPORT_JOB_ATTEMPTS`: attempts per durable job (default: 2, floor 1)
/// - `EXPORT_JOB_BACKOFF_MS`: fixed retry backoff (default: 1000)
/// - `EXPORT_WORKER_CONCURRENCY`: durable worker parallelism (default: 2, floor 1)
/// - `EXPORT_WORKER_INTERVAL_MS`: ephemeral poll interval (default: 500, floor 100)
/// - `EXPORT_HTTP_TIMEOUT_MS`: render call timeout (default: 15000, floor 1000)
#[derive(Debug, Clone)]
pub struct Config {
    pub queue_backend: QueueBackend,
    pub redis_url: String,
    pub render_url: String,
    pub attempts_max: u32,
    pub backoff_ms: u64,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub render_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            queue_backend: parse_backend(env_var("EXPORT_QUEUE").as_deref()),
            redis_url: env_var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1/".to_string()),
            render_url: env_var("RENDER_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            attempts_max: parse_with_floor(env_var("EXPORT_JOB_ATTEMPTS").as_deref(), 2, 1) as u32,
            backoff_ms: parse_with_floor(env_var("EXPORT_JOB_BACKOFF_MS").as_deref(), 1000, 0),
            concurrency: parse_with_floor(env_var("EXPORT_WORKER_CONCURRENCY").as_deref(), 2, 1)
                as usize,
            poll_interval: Duration::from_millis(parse_with_floor(
                env_var("EXPORT_WORKER_INTERVAL_MS").as_deref(),
                500,
                100,
            )),
            render_timeout: Duration::from_millis(parse_with_floor(
                env_var("EXPORT_HTTP_TIMEOUT_MS").as_deref(),
                15000,
                1000,
            )),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts_max: self.attempts_max,
            backoff_ms: self.backoff_ms,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_backend(value: Option<&str>) -> QueueBackend {
    match value {
        Some("redis") => QueueBackend::Redis,
        _ => QueueBackend::Memory,
    }
}

/// Parses a numeric knob, falling back to `default` on absent or garbage
/// input and clamping to `floor`.
fn parse_with_floor(value: Option<&str>, default: u64, floor: u64) -> u64 {
    value
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
        .max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn backend_defaults_to_memory() {
        assert_eq!(parse_backend(None), QueueBackend::Memory);
        assert_eq!(parse_backend(Some("memory")), QueueBackend::Memory);
        assert_eq!(parse_backend(Some("redis")), QueueBackend::Redis);
        assert_eq!(parse_backend(Some("nonsense")), QueueBackend::Memory);
    }

    #[test]
    fn numeric_knobs_respect_defaults_and_floors() {
        assert_eq!(parse_with_floor(None, 500, 100), 500);
        assert_eq!(parse_with_floor(Some("250"), 500, 100), 250);
        assert_eq!(parse_with_floor(Some("10"), 500, 100), 100);
        assert_eq!(parse_with_floor(Some("not-a-number"), 500, 100), 500);
        assert_eq!(parse_with_floor(Some("500"), 15000, 1000), 1000);
    }
}
