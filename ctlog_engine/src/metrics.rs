// SPDX-License-Identifier: Apache-2.0
//! Per-worker metrics, published through a lock-free snapshot channel.
//! Lets an operator-visible "stuck worker" signal compute cursor lag
//! without any cross-worker locking.

use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct WorkerMetrics {
    pub log_name: String,
    pub cursor: u64,
    pub last_observed_tree_size: u64,
    pub domains_ingested: u64,
    pub certs_ingested: u64,
}

pub fn channel(log_name: &str) -> (watch::Sender<WorkerMetrics>, watch::Receiver<WorkerMetrics>) {
    watch::channel(WorkerMetrics {
        log_name: log_name.to_string(),
        ..Default::default()
    })
}
