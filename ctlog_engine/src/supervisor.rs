// SPDX-License-Identifier: Apache-2.0
//! Discovers logs and spawns/monitors one worker per log.

use std::time::Duration;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use ctlog_loglist::fetcher::Fetcher;
use ctlog_loglist::{select_active_logs, LogDescriptor};
use ctlog_offsets::OffsetStore;
use ctlog_sink::Sink;

use crate::config::Config;
use crate::metrics;
use crate::worker::{Worker, WorkerExit};

/// Fixed relaunch delay for a worker whose error escaped its internal
/// retry loop. No cap on the number of relaunch attempts.
const RELAUNCH_DELAY: Duration = Duration::from_secs(30);

pub struct Supervisor {
    config: Config,
    fetcher: Fetcher,
    log_list_client: reqwest::Client,
    offsets: OffsetStore,
    sink: Sink,
    cancel: CancellationToken,
}

impl Supervisor {
    /// # Errors
    /// Fails at boot if the offset directory can't be created or the
    /// log list can't be fetched and parsed — both are fatal.
    pub async fn start(config: Config, cancel: CancellationToken) -> Result<Self, String> {
        let offsets = OffsetStore::new(config.offset_dir.clone());
        offsets
            .init()
            .map_err(|err| format!("cannot create offset dir: {err}"))?;
        let sink = Sink::new(&config.sink);
        let fetcher = Fetcher::new();
        let log_list_client = reqwest::Client::builder()
            .user_agent("ctlogd/0.1")
            .build()
            .map_err(|err| format!("cannot build HTTP client: {err}"))?;

        Ok(Self {
            config,
            fetcher,
            log_list_client,
            offsets,
            sink,
            cancel,
        })
    }

    /// Fetch the currently-active log list and run every worker to
    /// completion or cancellation.
    ///
    /// # Errors
    /// Fails if the log list URL cannot be fetched and parsed.
    pub async fn run(self) -> Result<(), String> {
        let body = self
            .log_list_client
            .get(&self.config.log_list_url)
            .send()
            .await
            .map_err(|err| format!("cannot reach log list: {err}"))?
            .text()
            .await
            .map_err(|err| format!("cannot read log list body: {err}"))?;

        let logs = select_active_logs(&body, chrono::Utc::now())
            .map_err(|err| format!("cannot parse log list: {err}"))?;
        info!("discovered {} active logs", logs.len());

        let mut handles = Vec::new();
        for log in logs {
            let cancel = self.cancel.clone();
            let fetcher = self.fetcher.clone();
            let offsets = self.offsets.clone();
            let sink = self.sink.clone();
            let batch_size = self.config.batch_size;
            let poll_interval = self.config.poll_interval;
            handles.push(tokio::spawn(run_with_relaunch(
                log,
                fetcher,
                offsets,
                sink,
                batch_size,
                poll_interval,
                cancel,
            )));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!("worker task panicked: {err}");
            }
        }
        Ok(())
    }
}

async fn run_with_relaunch(
    log: LogDescriptor,
    fetcher: Fetcher,
    offsets: OffsetStore,
    sink: Sink,
    batch_size: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (metrics_tx, _metrics_rx) = metrics::channel(&log.name);
        let worker = Worker {
            log: log.clone(),
            fetcher: fetcher.clone(),
            offsets: offsets.clone(),
            sink: sink.clone(),
            batch_size,
            poll_interval,
            cancel: cancel.clone(),
            metrics: metrics_tx,
        };

        match worker.run().await {
            WorkerExit::Completed => {
                info!("\"{}\" worker done (frozen log fully ingested)", log.name);
                return;
            }
            WorkerExit::Cancelled => {
                info!("\"{}\" worker stopped on cancellation", log.name);
                return;
            }
            WorkerExit::Fatal(err) => {
                warn!(
                    "\"{}\" worker failed fatally, relaunching in {RELAUNCH_DELAY:?}: {err}",
                    log.name
                );
                tokio::select! {
                    () = tokio::time::sleep(RELAUNCH_DELAY) => {},
                    () = cancel.cancelled() => return,
                }
            }
        }
    }
}
