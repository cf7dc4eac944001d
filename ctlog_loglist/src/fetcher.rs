// SPDX-License-Identifier: Apache-2.0
//! HTTPS client for `get-sth` / `get-entries`: retries transient
//! failures with full-jitter exponential backoff, clamps to whatever
//! range the server actually returns.

use crate::LogDescriptor;
use log::{debug, warn};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Full-jitter exponential backoff: delay is drawn uniformly from
/// `[0, min(base * 2^attempt, cap)]`, reset to the first attempt on
/// any successful request.
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

/// A non-retryable failure surfaced to the Worker: anything that
/// backoff cannot fix.
#[derive(Debug)]
pub enum FetchError {
    /// 4xx other than 429.
    ClientError(reqwest::StatusCode),
    /// Response body wasn't the JSON shape we expected.
    Deserialize(serde_json::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientError(status) => write!(f, "log returned client error {status}"),
            Self::Deserialize(err) => write!(f, "failed to parse log response: {err}"),
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Deserialize)]
struct SthResponse {
    tree_size: u64,
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    leaf_input: String,
    // `extra_data` is present in the wire format but never consumed;
    // omitting the field means serde simply ignores it.
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    #[must_use]
    pub fn new() -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "From",
            reqwest::header::HeaderValue::from_static("ctlogd@example.invalid"),
        );
        Self {
            client: reqwest::Client::builder()
                .user_agent("ctlogd/0.1")
                .default_headers(headers)
                .brotli(true)
                .gzip(true)
                .build()
                .expect("TLS backend unavailable"),
        }
    }

    /// `GET {url}/ct/v1/get-sth`, returning `tree_size`.
    /// Retries transient failures forever; there is no non-retryable
    /// outcome for this call short of the process shutting down.
    pub async fn tree_size(&self, log: &LogDescriptor) -> u64 {
        let mut backoff = Backoff::new();
        loop {
            match self.try_tree_size(log).await {
                Ok(size) => return size,
                Err(reason) => {
                    warn!("get-sth failed for \"{}\": {reason}, retrying", log.name);
                    backoff.wait().await;
                }
            }
        }
    }

    async fn try_tree_size(&self, log: &LogDescriptor) -> Result<u64, String> {
        let resp = self
            .client
            .get(log.get_sth_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("bad status {}", resp.status()));
        }
        let body: SthResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(body.tree_size)
    }

    /// `GET {url}/ct/v1/get-entries?start=S&end=E`. Returns the
    /// decoded `leaf_input` bytes for whatever prefix of
    /// `[start, end]` the server actually served, which may be empty.
    /// Transient failures and 429 are retried internally; a 4xx other
    /// than 429 is surfaced to the caller.
    pub async fn fetch_entries(
        &self,
        log: &LogDescriptor,
        start: u64,
        end: u64,
    ) -> Result<Vec<Vec<u8>>, FetchError> {
        let mut backoff = Backoff::new();
        loop {
            let resp = self
                .client
                .get(log.get_entries_url(start, end))
                .timeout(Duration::from_secs(30))
                .send()
                .await;
            let resp = match resp {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(
                        "get-entries transport error for \"{}\" ({start}-{end}): {err}",
                        log.name
                    );
                    backoff.wait().await;
                    continue;
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                warn!("rate limited fetching \"{}\" ({start}-{end})", log.name);
                match retry_after {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => backoff.wait().await,
                }
                continue;
            }
            if status.is_server_error() {
                warn!(
                    "get-entries server error {status} for \"{}\" ({start}-{end})",
                    log.name
                );
                backoff.wait().await;
                continue;
            }
            if !status.is_success() {
                return Err(FetchError::ClientError(status));
            }

            let body = resp.bytes().await.map_err(|e| {
                FetchError::Deserialize(serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                )))
            })?;
            let parsed: EntriesResponse =
                serde_json::from_slice(&body).map_err(FetchError::Deserialize)?;

            backoff.reset();
            if parsed.entries.is_empty() {
                debug!("\"{}\" returned an empty entries array", log.name);
            }
            let decoded = parsed
                .entries
                .into_iter()
                .filter_map(|entry| match base64::decode(&entry.leaf_input) {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        debug!("\"{}\" sent unparseable base64 leaf_input: {err}", log.name);
                        None
                    }
                })
                .collect();
            return Ok(decoded);
        }
    }
}
