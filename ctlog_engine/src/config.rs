// SPDX-License-Identifier: Apache-2.0
//! Environment-driven configuration. CLI plumbing and container
//! packaging are out of scope; everything here is read once at
//! process start.

use std::env;
use std::time::Duration;

use ctlog_sink::SinkConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_list_url: String,
    pub poll_interval: Duration,
    pub batch_size: u64,
    pub offset_dir: String,
    pub sink: SinkConfig,
    pub verbose: bool,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            log_list_url: env_or("LOG_LIST_URL", ctlog_loglist::DEFAULT_LOG_LIST_URL),
            poll_interval: Duration::from_secs(env_parsed("POLL_INTERVAL_SECONDS", 5)),
            batch_size: env_parsed("BATCH_SIZE", 512),
            offset_dir: env_or("OFFSET_DIR", "./offsets"),
            sink: SinkConfig {
                host: env_or("CLICKHOUSE_HOST", "clickhouse"),
                port: env_parsed("CLICKHOUSE_PORT", 8123),
                database: env_or("CLICKHOUSE_DB", "ct"),
                user: env_or("CLICKHOUSE_USER", "default"),
                password: env_or("CLICKHOUSE_PASSWORD", "mysecretpassword"),
                table: env_or("CLICKHOUSE_TABLE", "domains"),
            },
            verbose: env_parsed("VERBOSE", true),
        }
    }
}
