// SPDX-License-Identifier: Apache-2.0
//! Log registry and log client: discover currently-active CT logs
//! from the v3 log list and talk to their `/ct/v1/...` endpoints.

pub mod fetcher;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Default source of the v3 log list (overridden by `LOG_LIST_URL`).
pub const DEFAULT_LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/v3/log_list.json";

#[derive(Debug, Clone, Deserialize)]
struct RawLogList {
    operators: Vec<RawOperator>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawOperator {
    logs: Vec<RawLog>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawLog {
    description: String,
    url: String,
    state: RawState,
    temporal_interval: RawInterval,
}

#[derive(Debug, Clone, Deserialize)]
struct RawInterval {
    start_inclusive: String,
    end_exclusive: String,
}

#[derive(Debug, Clone, Deserialize)]
enum RawState {
    #[serde(rename = "usable")]
    Usable { timestamp: String },
    #[serde(rename = "frozen")]
    Frozen { timestamp: String },
    #[serde(rename = "retired")]
    Retired { timestamp: String },
    #[serde(rename = "rejected")]
    Rejected { timestamp: String },
    #[serde(rename = "pending")]
    Pending { timestamp: String },
    #[serde(rename = "qualified")]
    Qualified { timestamp: String },
}

/// Whether a log may still accept writes (`usable`) or has stopped
/// accepting new entries but remains readable to the end of its tree
/// (`frozen`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPollState {
    Usable,
    Frozen,
}

/// An immutable, selected, currently-active CT log. Produced once by
/// [`select_active_logs`] and shared read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDescriptor {
    /// Filesystem-safe derivation of the log's human description.
    pub name: String,
    /// Scheme+host+base path, trailing slash stripped.
    pub url: String,
    pub state: LogPollState,
}

impl LogDescriptor {
    #[must_use]
    pub fn get_sth_url(&self) -> String {
        format!("{}/ct/v1/get-sth", self.url)
    }

    #[must_use]
    pub fn get_entries_url(&self, start: u64, end: u64) -> String {
        format!("{}/ct/v1/get-entries?start={start}&end={end}", self.url)
    }
}

fn sanitize_name(description: &str) -> String {
    description
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| *c != '/' && *c != '\\')
        .collect()
}

/// Parse the v3 log list JSON body and select logs that are currently
/// active: exactly one of `usable`/`frozen` state, and `now` inside
/// the log's `temporal_interval`.
///
/// # Errors
/// Returns an error if the body is not valid log-list JSON.
pub fn select_active_logs(
    body: &str,
    now: DateTime<Utc>,
) -> Result<Vec<LogDescriptor>, serde_json::Error> {
    let list: RawLogList = serde_json::from_str(body)?;
    let mut selected = Vec::new();
    for operator in list.operators {
        for log in operator.logs {
            let state = match log.state {
                RawState::Usable { .. } => LogPollState::Usable,
                RawState::Frozen { .. } => LogPollState::Frozen,
                RawState::Retired { .. }
                | RawState::Rejected { .. }
                | RawState::Pending { .. }
                | RawState::Qualified { .. } => continue,
            };
            let Ok(start) = DateTime::parse_from_rfc3339(&log.temporal_interval.start_inclusive)
            else {
                continue;
            };
            let Ok(end) = DateTime::parse_from_rfc3339(&log.temporal_interval.end_exclusive)
            else {
                continue;
            };
            if !(start.with_timezone(&Utc) <= now && now < end.with_timezone(&Utc)) {
                continue;
            }
            selected.push(LogDescriptor {
                name: sanitize_name(&log.description),
                url: log.url.trim_end_matches('/').to_string(),
                state,
            });
        }
    }
    Ok(selected)
}
