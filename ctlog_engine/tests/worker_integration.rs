// SPDX-License-Identifier: Apache-2.0
//! End-to-end Worker run against a fake log server and a fake sink
//! endpoint, covering the partial-batch, skip-but-advance, and
//! crash-before-cursor-commit scenarios from the testable-properties
//! section.

use std::time::Duration;

use ctlog_loglist::fetcher::Fetcher;
use ctlog_loglist::{LogDescriptor, LogPollState};
use ctlog_offsets::OffsetStore;
use ctlog_sink::{Sink, SinkConfig};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn leaf_with_garbage() -> String {
    base64::encode([0xff; 4])
}

// Same `MerkleTreeLeaf` encoding ctlog_cert's own tests use: version,
// leaf type, a timestamp, entry type 0 (x509_entry), then the DER
// certificate with a 24-bit length prefix.
fn leaf_with_cert(cert_der: &[u8]) -> String {
    let mut v = vec![0u8, 0u8];
    v.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    v.extend_from_slice(&0u16.to_be_bytes());
    let len = cert_der.len() as u32;
    v.extend_from_slice(&len.to_be_bytes()[1..]);
    v.extend_from_slice(cert_der);
    base64::encode(v)
}

async fn clickhouse_stub() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn sink_for(server: &MockServer) -> Sink {
    let url = server.uri();
    let without_scheme = url.trim_start_matches("http://");
    let (host, port) = without_scheme.split_once(':').unwrap();
    Sink::new(&SinkConfig {
        host: host.to_string(),
        port: port.parse().unwrap(),
        database: "ct".to_string(),
        user: "default".to_string(),
        password: String::new(),
        table: "domains".to_string(),
    })
}

// S4 + invariant 2: a batch made entirely of unparseable entries
// produces zero rows but still advances the cursor past every entry
// the server actually returned.
#[tokio::test(flavor = "multi_thread")]
async fn cursor_advances_past_entirely_skipped_batch() {
    let log_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree_size": 5, "timestamp": 1, "sha256_root_hash": "", "tree_head_signature": ""
        })))
        .mount(&log_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entries": (0..5).map(|_| serde_json::json!({
                "leaf_input": leaf_with_garbage(),
                "extra_data": ""
            })).collect::<Vec<_>>()
        })))
        .mount(&log_server)
        .await;

    let clickhouse = clickhouse_stub().await;
    let offset_dir = tempfile::tempdir().unwrap();
    let offsets = OffsetStore::new(offset_dir.path());
    offsets.init().unwrap();

    let log = LogDescriptor {
        name: "integration_test_log".to_string(),
        url: log_server.uri(),
        state: LogPollState::Usable,
    };
    let cancel = CancellationToken::new();
    let (metrics_tx, _metrics_rx) = ctlog_engine::metrics::channel(&log.name);

    let worker = ctlog_engine::worker::Worker {
        log: log.clone(),
        fetcher: Fetcher::new(),
        offsets: offsets.clone(),
        sink: sink_for(&clickhouse),
        batch_size: 512,
        poll_interval: Duration::from_millis(20),
        cancel: cancel.clone(),
        metrics: metrics_tx,
    };

    let handle = tokio::spawn(worker.run());
    // Give the worker time to process the one available batch and
    // loop back into its idle-poll sleep before we cut it off.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let _ = handle.await;

    assert_eq!(offsets.load(&log.name).unwrap(), Some(5));
}

// S5: server returns fewer entries than requested; the cursor lands
// exactly at the number of entries actually received, not the
// requested range end.
#[tokio::test(flavor = "multi_thread")]
async fn partial_response_advances_cursor_to_received_count_only() {
    let log_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree_size": 1000, "timestamp": 1, "sha256_root_hash": "", "tree_head_signature": ""
        })))
        .mount(&log_server)
        .await;
    // Server only ever returns 3 entries regardless of the requested range.
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entries": (0..3).map(|_| serde_json::json!({
                "leaf_input": leaf_with_garbage(),
                "extra_data": ""
            })).collect::<Vec<_>>()
        })))
        .mount(&log_server)
        .await;

    let clickhouse = clickhouse_stub().await;
    let offset_dir = tempfile::tempdir().unwrap();
    let offsets = OffsetStore::new(offset_dir.path());
    offsets.init().unwrap();

    let log = LogDescriptor {
        name: "integration_test_log_partial".to_string(),
        url: log_server.uri(),
        state: LogPollState::Usable,
    };
    let cancel = CancellationToken::new();
    let (metrics_tx, _metrics_rx) = ctlog_engine::metrics::channel(&log.name);

    let worker = ctlog_engine::worker::Worker {
        log: log.clone(),
        fetcher: Fetcher::new(),
        offsets: offsets.clone(),
        sink: sink_for(&clickhouse),
        batch_size: 512,
        poll_interval: Duration::from_millis(20),
        cancel: cancel.clone(),
        metrics: metrics_tx,
    };

    let handle = tokio::spawn(worker.run());
    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    let _ = handle.await;

    assert_eq!(offsets.load(&log.name).unwrap(), Some(3));
}

// Frozen log whose cursor has already reached tree_size exits cleanly
// instead of polling forever.
#[tokio::test(flavor = "multi_thread")]
async fn frozen_log_already_caught_up_completes() {
    let log_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree_size": 0, "timestamp": 1, "sha256_root_hash": "", "tree_head_signature": ""
        })))
        .mount(&log_server)
        .await;

    let clickhouse = clickhouse_stub().await;
    let offset_dir = tempfile::tempdir().unwrap();
    let offsets = OffsetStore::new(offset_dir.path());
    offsets.init().unwrap();

    let log = LogDescriptor {
        name: "integration_test_frozen".to_string(),
        url: log_server.uri(),
        state: LogPollState::Frozen,
    };
    let cancel = CancellationToken::new();
    let (metrics_tx, _metrics_rx) = ctlog_engine::metrics::channel(&log.name);

    let worker = ctlog_engine::worker::Worker {
        log: log.clone(),
        fetcher: Fetcher::new(),
        offsets,
        sink: sink_for(&clickhouse),
        batch_size: 512,
        poll_interval: Duration::from_secs(60),
        cancel,
        metrics: metrics_tx,
    };

    let exit = tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("worker should complete promptly for an already-caught-up frozen log");
    assert!(matches!(exit, ctlog_engine::worker::WorkerExit::Completed));
}

// S6 + invariant 7: a worker that dies after the sink durably accepts
// a batch but before `OffsetStore::store` renames the new cursor into
// place must not lose that batch. On restart it reloads the stale,
// pre-crash cursor and resends the exact same range to the sink; the
// analytical store is expected to dedup by (fingerprint, domain), not
// the worker.
#[tokio::test(flavor = "multi_thread")]
async fn crash_before_cursor_commit_reprocesses_batch_on_restart() {
    let cert_der = include_bytes!("../../ctlog_cert/test_certs/single_cn.der");

    let log_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tree_size": 1, "timestamp": 1, "sha256_root_hash": "", "tree_head_signature": ""
        })))
        .mount(&log_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entries": [{
                "leaf_input": leaf_with_cert(cert_der),
                "extra_data": ""
            }]
        })))
        .mount(&log_server)
        .await;

    let clickhouse = clickhouse_stub().await;
    let offset_dir = tempfile::tempdir().unwrap();
    let offsets = OffsetStore::new(offset_dir.path());
    offsets.init().unwrap();

    let log = LogDescriptor {
        name: "integration_test_crash_restart".to_string(),
        url: log_server.uri(),
        state: LogPollState::Frozen,
    };

    // First run: the worker fetches the only batch, the sink durably
    // accepts it, and the cursor is committed to 1.
    let cancel = CancellationToken::new();
    let (metrics_tx, _metrics_rx) = ctlog_engine::metrics::channel(&log.name);
    let worker = ctlog_engine::worker::Worker {
        log: log.clone(),
        fetcher: Fetcher::new(),
        offsets: offsets.clone(),
        sink: sink_for(&clickhouse),
        batch_size: 512,
        poll_interval: Duration::from_secs(60),
        cancel,
        metrics: metrics_tx,
    };
    let exit = tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("first run should complete");
    assert!(matches!(exit, ctlog_engine::worker::WorkerExit::Completed));
    assert_eq!(offsets.load(&log.name).unwrap(), Some(1));

    let inserts_after_first_run = clickhouse
        .received_requests()
        .await
        .expect("clickhouse stub records requests")
        .len();
    assert_eq!(inserts_after_first_run, 1, "exactly one batch reached the sink");

    // Simulate a crash between the durable insert and the cursor
    // rename: roll the cursor back to its pre-insert value, as if the
    // process died before `OffsetStore::store` ever renamed the new
    // offset file into place.
    offsets.store(&log.name, 0).unwrap();

    // Second run ("restart"): a fresh worker with no memory of the
    // first run reloads the stale cursor and reprocesses the same
    // range, resending it to the sink.
    let cancel2 = CancellationToken::new();
    let (metrics_tx2, _metrics_rx2) = ctlog_engine::metrics::channel(&log.name);
    let worker2 = ctlog_engine::worker::Worker {
        log: log.clone(),
        fetcher: Fetcher::new(),
        offsets: offsets.clone(),
        sink: sink_for(&clickhouse),
        batch_size: 512,
        poll_interval: Duration::from_secs(60),
        cancel: cancel2,
        metrics: metrics_tx2,
    };
    let exit2 = tokio::time::timeout(Duration::from_secs(5), worker2.run())
        .await
        .expect("restarted run should complete");
    assert!(matches!(exit2, ctlog_engine::worker::WorkerExit::Completed));
    assert_eq!(offsets.load(&log.name).unwrap(), Some(1));

    let inserts_after_restart = clickhouse
        .received_requests()
        .await
        .expect("clickhouse stub records requests")
        .len();
    assert_eq!(
        inserts_after_restart, 2,
        "restart resent the same batch to the sink; at-least-once delivery means the \
         rows arrive twice and the store must dedup by (fingerprint, domain)"
    );
}
