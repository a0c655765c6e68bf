#![forbid(unsafe_code)]

use std::time::Duration;

use flowdash_core::ResourceKind;
use flowdash_store::{spawn_ingest, BatchPolicy, IngestConfig};

fn pod(ns: &str, name: &str) -> serde_json::Value {
    serde_json::json!({ "kind": "Pod", "metadata": { "name": name, "namespace": ns } })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publishes_one_epoch_per_batch() {
    let (tx, backend) = spawn_ingest(IngestConfig { queue_cap: 8, policy: BatchPolicy::Isolate });
    let mut epochs = backend.subscribe_epoch();
    tx.send(vec![pod("ns", "a"), pod("ns", "b")]).await.unwrap();
    tx.send(vec![pod("ns", "c")]).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while *epochs.borrow_and_update() < 2 {
            epochs.changed().await.unwrap();
        }
    })
    .await
    .expect("epoch 2 published");

    let snap = backend.current();
    assert_eq!(snap.epoch, 2);
    assert_eq!(snap.counts()[&ResourceKind::Pod], 3);
    assert_eq!(backend.last_report().upserts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn report_subscribers_see_every_batch() {
    let (tx, backend) = spawn_ingest(IngestConfig { queue_cap: 8, policy: BatchPolicy::Isolate });
    let mut reports = backend.subscribe_reports();
    tx.send(vec![pod("ns", "a"), pod("ns", "b")]).await.unwrap();
    tx.send(vec![pod("ns", "c")]).await.unwrap();
    drop(tx);

    let mut printed = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Ok(report) = reports.recv().await {
            printed.extend(report.changes.iter().map(ToString::to_string));
        }
    })
    .await
    .expect("ingest loop closed the report channel");

    assert_eq!(printed, ["+ Pod ns/a", "+ Pod ns/b", "+ Pod ns/c"]);
    assert_eq!(backend.current().epoch, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_batch_publishes_nothing() {
    let (tx, backend) = spawn_ingest(IngestConfig { queue_cap: 8, policy: BatchPolicy::Abort });
    let bad = serde_json::json!({ "kind": "Application", "metadata": { "name": "x" }, "spec": {} });
    tx.send(vec![pod("ns", "a"), bad]).await.unwrap();
    tx.send(vec![pod("ns", "b")]).await.unwrap();
    drop(tx);

    let mut epochs = backend.subscribe_epoch();
    tokio::time::timeout(Duration::from_secs(2), async {
        while *epochs.borrow_and_update() < 1 {
            epochs.changed().await.unwrap();
        }
    })
    .await
    .expect("second batch published");

    let snap = backend.current();
    assert_eq!(snap.epoch, 1);
    let pods: Vec<_> = snap.pods.get("ns").unwrap().keys().collect();
    assert_eq!(pods, ["b"]);
}
