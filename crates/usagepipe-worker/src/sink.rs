//! Event sinks
//!
//! A sink receives every decoded usage record. Publishing awaits the sink, so a slow
//! sink slows its file down rather than buffering without bound.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use usagepipe_core::{DecodedRecord, PipelineError, PipelineResult};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, record: DecodedRecord) -> PipelineResult<()>;

    fn sink_name(&self) -> &'static str;
}

/// Forwards records into a bounded channel. Awaiting channel capacity is the
/// backpressure signal; a dropped receiver fails publishing with `SinkClosed`.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<DecodedRecord>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<DecodedRecord>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DecodedRecord>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, record: DecodedRecord) -> PipelineResult<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| PipelineError::SinkClosed)
    }

    fn sink_name(&self) -> &'static str {
        "channel"
    }
}

/// Emits each record as a tracing event on the `usagepipe::events` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn publish(&self, record: DecodedRecord) -> PipelineResult<()> {
        let metadata = serde_json::to_string(&record.metadata).unwrap_or_default();
        let payload = serde_json::to_string(&record.payload).unwrap_or_default();
        tracing::info!(
            target: "usagepipe::events",
            stream = %record.stream_key,
            metadata = %metadata,
            payload = %payload,
            "usage event"
        );
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "log"
    }
}

/// Keeps every published record in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DecodedRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecodedRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, record: DecodedRecord) -> PipelineResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usagepipe_core::FieldValue;

    fn record() -> DecodedRecord {
        DecodedRecord::new("s:1", "t1.usage.1", "t1", vec![FieldValue::Int(1)])
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::channel(4);
        sink.publish(record()).await.unwrap();
        sink.publish(DecodedRecord::new("s:2", "f", "t", vec![])).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().stream_key, "s:1");
        assert_eq!(rx.recv().await.unwrap().stream_key, "s:2");
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);

        let err = sink.publish(record()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SinkClosed));
    }

    #[tokio::test]
    async fn test_channel_sink_waits_for_capacity() {
        let (sink, mut rx) = ChannelSink::channel(1);
        sink.publish(record()).await.unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            sink.publish(record()),
        )
        .await;
        assert!(blocked.is_err());

        rx.recv().await.unwrap();
        sink.publish(record()).await.unwrap();
    }
}
