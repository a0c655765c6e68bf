#![forbid(unsafe_code)]

use flowdash_feed::{pump, EventSource, FlowMessage, LineSource, MessageSink, WriterSink};
use tokio::sync::mpsc;

const STREAM: &str = r#"{"items":[{"kind":"Pod","metadata":{"name":"a","namespace":"ns"}}]}

this line is not json
{"items":[{"kind":"Pod","metadata":{"name":"b","namespace":"ns"}},{"kind":"Rollout","metadata":{"name":"r","namespace":"ns"}}]}
{"items":null}
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn line_source_skips_blank_and_bad_lines() {
    let mut src = LineSource::new(STREAM.as_bytes(), "fixture");
    let mut sizes = Vec::new();
    while let Some(batch) = src.next_batch().await.unwrap() {
        sizes.push(batch.len());
    }
    assert_eq!(sizes, [1, 2, 0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_forwards_batches_in_order() {
    let (tx, mut rx) = mpsc::channel(8);
    let sent = pump(LineSource::new(STREAM.as_bytes(), "fixture"), tx).await.unwrap();
    assert_eq!(sent, 3);
    let first = rx.recv().await.unwrap();
    assert_eq!(first[0]["metadata"]["name"], "a");
    let second = rx.recv().await.unwrap();
    assert_eq!(second[1]["kind"], "Rollout");
    assert!(rx.recv().await.unwrap().is_empty());
    assert!(rx.recv().await.is_none(), "sender dropped after drain");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pump_stops_when_receiver_is_gone() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let sent = pump(LineSource::new(STREAM.as_bytes(), "fixture"), tx).await.unwrap();
    assert_eq!(sent, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writer_sink_emits_one_line_per_message() {
    let mut sink = WriterSink::new(Vec::new());
    sink.send(&FlowMessage::container_log("ci", "p1", "main")).await.unwrap();
    sink.send(&FlowMessage::container_log("ci", "p2", "init")).await.unwrap();
    let out = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<_> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains(r#""podName":"p2""#));
}
