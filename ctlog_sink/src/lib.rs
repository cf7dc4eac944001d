// SPDX-License-Identifier: Apache-2.0
//! Batched, column-named insertion into the analytical store. One
//! `DomainRow` per (certificate, name) pair.

use std::fmt;

use clickhouse::Row;
use serde::Serialize;

/// One (certificate, name) pair as written to the store. Column order
/// here is the column order on the wire: `ts, domain, base_domain,
/// fingerprint, issuer, subject, san, not_before, not_after,
/// log_name`.
#[derive(Debug, Clone, Serialize, Row)]
pub struct DomainRow {
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub ts: time::OffsetDateTime,
    pub domain: String,
    pub base_domain: String,
    pub fingerprint: String,
    pub issuer: String,
    pub subject: String,
    pub san: Vec<String>,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub not_before: time::OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub not_after: time::OffsetDateTime,
    pub log_name: String,
}

/// Connection parameters (`CLICKHOUSE_HOST/PORT/DB/USER/PASSWORD`).
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
}

/// Whether a failed insert should be retried with the same batch
/// (transient) or escalated past the worker's retry loop (permanent).
#[derive(Debug)]
pub enum SinkError {
    Transient(clickhouse::error::Error),
    Permanent(clickhouse::error::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(err) => write!(f, "transient sink error: {err}"),
            Self::Permanent(err) => write!(f, "permanent sink error: {err}"),
        }
    }
}

impl std::error::Error for SinkError {}

// The driver does not expose a structured transient/permanent split,
// so fall back to matching the well-known ClickHouse exception classes
// embedded in its error text: auth and schema mismatches are
// permanent, everything else — network, timeout, server overload — is
// treated as transient so the Worker keeps retrying rather than
// stalling a whole log on a blip.
fn is_permanent(text: &str) -> bool {
    text.contains("AUTHENTICATION_FAILED")
        || text.contains("UNKNOWN_TABLE")
        || text.contains("NO_SUCH_COLUMN")
        || text.contains("TYPE_MISMATCH")
}

fn classify(err: clickhouse::error::Error) -> SinkError {
    if is_permanent(&err.to_string()) {
        SinkError::Permanent(err)
    } else {
        SinkError::Transient(err)
    }
}

/// A connection to the column store. Cheap to clone and safe to share
/// across workers — the underlying `clickhouse::Client` is a thin
/// HTTP client handle.
#[derive(Clone)]
pub struct Sink {
    client: clickhouse::Client,
    table: String,
}

impl Sink {
    #[must_use]
    pub fn new(config: &SinkConfig) -> Self {
        let client = clickhouse::Client::default()
            .with_url(format!("http://{}:{}", config.host, config.port))
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password);
        Self {
            client,
            table: config.table.clone(),
        }
    }

    /// Write `rows` and wait for the store to durably accept them —
    /// synchronous from the caller's point of view. An empty batch is
    /// a no-op, not a round trip.
    ///
    /// # Errors
    /// See [`SinkError`] for the retry policy each variant implies.
    pub async fn insert(&self, rows: &[DomainRow]) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut insert = self
            .client
            .insert(&self.table)
            .map_err(classify)?;
        for row in rows {
            insert.write(row).await.map_err(classify)?;
        }
        insert.end().await.map_err(classify)
    }
}
