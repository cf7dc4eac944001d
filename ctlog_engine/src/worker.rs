// SPDX-License-Identifier: Apache-2.0
//! Per-log worker: binds the log client, offset store, leaf parser,
//! suffix classifier, and sink into one at-least-once pipeline.
//! Strictly sequential: fetch, parse, insert, commit, no pipelining
//! across stages.

use std::cmp::min;
use std::fmt;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio_util::sync::CancellationToken;

use ctlog_loglist::fetcher::{FetchError, Fetcher};
use ctlog_loglist::{LogDescriptor, LogPollState};
use ctlog_offsets::OffsetStore;
use ctlog_sink::{DomainRow, Sink, SinkError};

use crate::metrics::WorkerMetrics;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Number of consecutive permanent sink errors tolerated before a
/// worker gives up and lets the supervisor relaunch it.
const MAX_PERMANENT_SINK_RETRIES: u32 = 5;

struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    async fn wait(&mut self) {
        let exp = INITIAL_BACKOFF.as_secs_f64() * 2f64.powi(self.attempt as i32);
        let capped = exp.min(MAX_BACKOFF.as_secs_f64());
        self.attempt += 1;
        let jittered = fastrand::f64() * capped;
        tokio::time::sleep(Duration::from_secs_f64(jittered)).await;
    }
}

/// Why a worker stopped running. Only [`WorkerExit::Fatal`] is a
/// failure the supervisor needs to react to.
#[derive(Debug)]
pub enum WorkerExit {
    /// Log is frozen and its full tree has been ingested.
    Completed,
    /// The cancellation token fired.
    Cancelled,
    /// An error escaped the internal retry loop entirely: offset file
    /// corruption, or too many permanent sink failures.
    Fatal(WorkerError),
}

#[derive(Debug)]
pub enum WorkerError {
    CorruptOffset(ctlog_offsets::CorruptOffset),
    SinkPermanentlyFailing(SinkError),
    LogRejectedRequest(FetchError),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptOffset(err) => write!(f, "{err}"),
            Self::SinkPermanentlyFailing(err) => write!(f, "{err}"),
            Self::LogRejectedRequest(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WorkerError {}

pub struct Worker {
    pub log: LogDescriptor,
    pub fetcher: Fetcher,
    pub offsets: OffsetStore,
    pub sink: Sink,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
    pub metrics: tokio::sync::watch::Sender<WorkerMetrics>,
}

impl Worker {
    pub async fn run(mut self) -> WorkerExit {
        let mut idle_backoff = Backoff::new();
        let mut permanent_sink_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return WorkerExit::Cancelled;
            }

            let size = tokio::select! {
                () = self.cancel.cancelled() => return WorkerExit::Cancelled,
                size = self.fetcher.tree_size(&self.log) => size,
            };

            let idx = match self.offsets.load(&self.log.name) {
                Ok(Some(idx)) => idx,
                Ok(None) => 0,
                Err(err) => return WorkerExit::Fatal(WorkerError::CorruptOffset(err)),
            };

            if idx >= size {
                if self.log.state == LogPollState::Frozen {
                    info!("\"{}\" fully ingested (frozen)", self.log.name);
                    return WorkerExit::Completed;
                }
                trace!("\"{}\" up to date at {idx}", self.log.name);
                if !sleep_or_cancel(self.poll_interval, &self.cancel).await {
                    return WorkerExit::Cancelled;
                }
                continue;
            }

            let end = min(idx + self.batch_size - 1, size - 1);
            let entries = tokio::select! {
                () = self.cancel.cancelled() => return WorkerExit::Cancelled,
                entries = self.fetcher.fetch_entries(&self.log, idx, end) => entries,
            };
            let entries = match entries {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        "\"{}\" rejected get-entries {idx}-{end}: {err}",
                        self.log.name
                    );
                    return WorkerExit::Fatal(WorkerError::LogRejectedRequest(err));
                }
            };

            let received = entries.len() as u64;
            if received == 0 {
                debug!("\"{}\" returned zero entries, backing off", self.log.name);
                if !wait_or_cancel(&mut idle_backoff, &self.cancel).await {
                    return WorkerExit::Cancelled;
                }
                continue;
            }

            let rows = build_rows(&self.log.name, idx, &entries);

            if !rows.is_empty() {
                match self.sink.insert(&rows).await {
                    Ok(()) => {
                        permanent_sink_failures = 0;
                    }
                    Err(SinkError::Transient(err)) => {
                        warn!(
                            "\"{}\" sink transient error, retrying batch {idx}-{end}: {err}",
                            self.log.name
                        );
                        if !wait_or_cancel(&mut idle_backoff, &self.cancel).await {
                            return WorkerExit::Cancelled;
                        }
                        continue;
                    }
                    Err(SinkError::Permanent(err)) => {
                        permanent_sink_failures += 1;
                        warn!(
                            "\"{}\" sink permanent error ({permanent_sink_failures}/{MAX_PERMANENT_SINK_RETRIES}): {err}",
                            self.log.name
                        );
                        if permanent_sink_failures >= MAX_PERMANENT_SINK_RETRIES {
                            return WorkerExit::Fatal(WorkerError::SinkPermanentlyFailing(
                                SinkError::Permanent(err),
                            ));
                        }
                        if !wait_or_cancel(&mut idle_backoff, &self.cancel).await {
                            return WorkerExit::Cancelled;
                        }
                        continue;
                    }
                }
            }

            let new_idx = idx + received;
            if let Err(err) = self.offsets.store(&self.log.name, new_idx) {
                warn!(
                    "\"{}\" failed to persist cursor at {new_idx}, will reprocess: {err}",
                    self.log.name
                );
                if !wait_or_cancel(&mut idle_backoff, &self.cancel).await {
                    return WorkerExit::Cancelled;
                }
                continue;
            }

            idle_backoff.reset();
            self.metrics.send_modify(|metrics| {
                metrics.cursor = new_idx;
                metrics.last_observed_tree_size = size;
                metrics.domains_ingested += rows.len() as u64;
                metrics.certs_ingested += received;
            });
            debug!(
                "\"{}\" committed {idx}-{end} ({} rows)",
                self.log.name,
                rows.len()
            );
        }
    }
}

fn build_rows(log_name: &str, start_idx: u64, entries: &[Vec<u8>]) -> Vec<DomainRow> {
    let now = time::OffsetDateTime::now_utc();
    let mut rows = Vec::new();
    for (offset, leaf_input) in entries.iter().enumerate() {
        let idx = start_idx + offset as u64;
        let record = match ctlog_cert::parse_leaf(leaf_input) {
            Ok(record) => record,
            Err(skip) => {
                debug!("\"{log_name}\" skipped entry {idx}: {skip}");
                continue;
            }
        };
        let san: Vec<String> = record.names.iter().cloned().collect();
        for name in &record.names {
            let base_domain = ctlog_suffix::base_of(name).unwrap_or_default();
            rows.push(DomainRow {
                ts: now,
                domain: name.clone(),
                base_domain,
                fingerprint: record.fingerprint.to_string(),
                issuer: record.issuer_rfc4514.clone(),
                subject: record.subject_rfc4514.clone(),
                san: san.clone(),
                not_before: time::OffsetDateTime::from_unix_timestamp(record.not_before)
                    .unwrap_or(now),
                not_after: time::OffsetDateTime::from_unix_timestamp(record.not_after)
                    .unwrap_or(now),
                log_name: log_name.to_string(),
            });
        }
    }
    rows
}

/// Sleep for `dur`, or return `false` immediately if cancelled first.
async fn sleep_or_cancel(dur: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(dur) => true,
        () = cancel.cancelled() => false,
    }
}

async fn wait_or_cancel(backoff: &mut Backoff, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = backoff.wait() => true,
        () = cancel.cancelled() => false,
    }
}
