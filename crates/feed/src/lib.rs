//! Flowdash feed – transport message decoding and the pump that moves
//! batches into the ingest loop.
//!
//! The transport itself (socket, reconnects) lives outside this crate. A
//! source only has to hand over one decoded batch at a time.

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One transport message: a batch of raw resource events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceList {
    #[serde(default)]
    pub items: Option<Vec<serde_json::Value>>,
}

/// Decode one transport message into its events. `items: null` is an empty
/// batch.
pub fn decode_message(text: &str) -> Result<Vec<serde_json::Value>> {
    let list: ResourceList = serde_json::from_str(text).context("decoding transport message")?;
    Ok(list.items.unwrap_or_default())
}

#[async_trait]
pub trait EventSource: Send {
    /// Next batch, or `None` once the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<serde_json::Value>>>;
}

/// Newline-delimited transport messages from any buffered reader. Lines that
/// fail to decode are logged and skipped.
pub struct LineSource<R> {
    lines: Lines<R>,
    label: String,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self { lines: reader.lines(), label: label.into(), line_no: 0 }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for LineSource<R> {
    async fn next_batch(&mut self) -> Result<Option<Vec<serde_json::Value>>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("reading {}", self.label))?
        {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match decode_message(&line) {
                Ok(batch) => return Ok(Some(batch)),
                Err(e) => {
                    let reason = format!("{:#}", e);
                    counter!("flowdash_feed_decode_errors_total", 1);
                    warn!(source = %self.label, line = self.line_no, error = %reason, "skipping undecodable message");
                }
            }
        }
        debug!(source = %self.label, lines = self.line_no, "source exhausted");
        Ok(None)
    }
}

pub async fn open_file(path: &Path) -> Result<LineSource<BufReader<tokio::fs::File>>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(LineSource::new(BufReader::new(file), path.display().to_string()))
}

pub fn stdin_source() -> LineSource<BufReader<tokio::io::Stdin>> {
    LineSource::new(BufReader::new(tokio::io::stdin()), "stdin")
}

/// Adapt a source into a stream of batches.
pub fn batches<S: EventSource>(source: S) -> impl Stream<Item = Result<Vec<serde_json::Value>>> + Send {
    futures::stream::try_unfold(source, |mut s| async move {
        Ok::<_, anyhow::Error>(s.next_batch().await?.map(|batch| (batch, s)))
    })
}

/// Forward every batch of `source` into the ingest channel. Returns the
/// number of batches sent; stops early when the receiver is gone.
pub async fn pump<S: EventSource>(source: S, tx: mpsc::Sender<Vec<serde_json::Value>>) -> Result<usize> {
    let stream = batches(source);
    futures::pin_mut!(stream);
    let mut sent = 0usize;
    while let Some(batch) = stream.try_next().await? {
        let size = batch.len();
        if tx.send(batch).await.is_err() {
            warn!(sent, "ingest channel closed; stopping pump");
            return Ok(sent);
        }
        sent += 1;
        counter!("flowdash_feed_batches_total", 1);
        debug!(size, "batch forwarded");
    }
    info!(sent, "feed drained");
    Ok(sent)
}

// ---- outbound ----

/// Requests the dashboard sends back over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", content = "messageData", rename_all = "camelCase")]
pub enum FlowMessage {
    /// Start streaming the log lines of one container.
    #[serde(rename_all = "camelCase")]
    ContainerLog { namespace: String, pod_name: String, container_name: String },
}

impl FlowMessage {
    pub fn container_log(namespace: &str, pod_name: &str, container_name: &str) -> Self {
        FlowMessage::ContainerLog {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            container_name: container_name.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("encoding flow message")
    }
}

#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, msg: &FlowMessage) -> Result<()>;
}

/// Writes one JSON message per line.
pub struct WriterSink<W> {
    inner: W,
}

impl<W> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for WriterSink<W> {
    async fn send(&mut self, msg: &FlowMessage) -> Result<()> {
        let mut line = msg.encode()?;
        line.push('\n');
        self.inner.write_all(line.as_bytes()).await.context("writing flow message")?;
        self.inner.flush().await.context("flushing flow message")?;
        Ok(())
    }
}
