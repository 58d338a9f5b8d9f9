//! Audit sink contract and implementations
//!
//! A sink publishes UTF-8 payloads to a named topic, optionally keyed. The
//! delivery loop owns exactly one sink and is its only caller.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::channel::QueueEntry;
use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};

/// Durable destination for audit records
#[async_trait]
pub trait AuditSink: Send {
    /// Establish the connection. Called at start and again after failures.
    async fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Publish a batch, in order
    async fn send(&mut self, batch: &[QueueEntry]) -> Result<()>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Wire envelope written by [`TcpSink`], one JSON document per line
#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    payload: &'a str,
}

/// Sink publishing newline-delimited JSON envelopes over TCP
///
/// Broker addresses are tried in configuration order; the first one that
/// accepts within the connect timeout is used until a send fails.
pub struct TcpSink {
    addresses: Vec<String>,
    connect_timeout: Duration,
    stream: Option<BufWriter<TcpStream>>,
}

impl TcpSink {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            addresses: config.broker_addresses.clone(),
            connect_timeout: config.connect_timeout(),
            stream: None,
        }
    }

    async fn write_batch(&mut self, batch: &[QueueEntry]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeliveryError::Unavailable("not connected".to_string()))?;

        for entry in batch {
            let envelope = Envelope {
                topic: &entry.topic,
                key: entry.key.as_deref(),
                payload: &entry.payload,
            };
            let mut line = serde_json::to_vec(&envelope)?;
            line.push(b'\n');
            stream.write_all(&line).await?;
        }

        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for TcpSink {
    async fn connect(&mut self) -> Result<()> {
        let mut last_error = None;

        for address in &self.addresses {
            match timeout(self.connect_timeout, TcpStream::connect(address.as_str())).await {
                Ok(Ok(stream)) => {
                    info!("Connected to audit sink at {}", address);
                    self.stream = Some(BufWriter::new(stream));
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!("Audit sink {} refused connection: {}", address, e);
                    last_error = Some(format!("{}: {}", address, e));
                }
                Err(_) => {
                    debug!("Audit sink {} connect timed out", address);
                    last_error = Some(format!("{}: connect timed out", address));
                }
            }
        }

        Err(DeliveryError::Unavailable(
            last_error.unwrap_or_else(|| "no broker addresses configured".to_string()),
        ))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, batch: &[QueueEntry]) -> Result<()> {
        let result = self.write_batch(batch).await;
        if result.is_err() {
            // reconnect on the next batch
            self.stream = None;
        }
        result
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush().await?;
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    available: bool,
    connected: bool,
    closed: bool,
    received: Vec<QueueEntry>,
    failed_sends: usize,
}

/// In-process sink. Clones share state, so a test can keep a handle while
/// the channel owns another.
#[derive(Debug, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Create a reachable sink
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemorySinkState {
                available: true,
                ..Default::default()
            })),
        }
    }

    /// Create a sink that refuses connections until made available
    pub fn unavailable() -> Self {
        let sink = Self::new();
        sink.set_available(false);
        sink
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock();
        state.available = available;
        if !available {
            state.connected = false;
        }
    }

    /// Everything published so far, in delivery order
    pub fn received(&self) -> Vec<QueueEntry> {
        self.state.lock().received.clone()
    }

    pub fn received_count(&self) -> usize {
        self.state.lock().received.len()
    }

    pub fn failed_sends(&self) -> usize {
        self.state.lock().failed_sends
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(DeliveryError::Unavailable("memory sink offline".to_string()));
        }
        state.connected = true;
        state.closed = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn send(&mut self, batch: &[QueueEntry]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.available || !state.connected {
            state.failed_sends += 1;
            state.connected = false;
            return Err(DeliveryError::Unavailable("memory sink offline".to_string()));
        }
        state.received.extend_from_slice(batch);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    fn entry(payload: &str) -> QueueEntry {
        QueueEntry {
            topic: "audits".to_string(),
            key: Some("alice".to_string()),
            payload: payload.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_outage() {
        let handle = MemorySink::unavailable();
        let mut sink = handle.clone();

        assert_err!(sink.connect().await);
        assert_err!(sink.send(&[entry("{}")]).await);
        assert_eq!(handle.failed_sends(), 1);

        handle.set_available(true);
        assert_ok!(sink.connect().await);
        assert_ok!(sink.send(&[entry("{}")]).await);
        assert_eq!(handle.received_count(), 1);
    }

    #[tokio::test]
    async fn test_tcp_sink_writes_envelopes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut received = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(line);
            }
            received
        });

        let config = DeliveryConfig {
            broker_addresses: vec!["127.0.0.1:1".to_string(), address],
            connect_timeout_ms: 500,
            ..Default::default()
        };
        let mut sink = TcpSink::new(&config);
        sink.connect().await.unwrap();
        sink.send(&[entry("{\"n\":1}"), entry("{\"n\":2}")]).await.unwrap();
        sink.close().await.unwrap();

        let lines = reader.await.unwrap();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["topic"], "audits");
        assert_eq!(first["key"], "alice");
        assert_eq!(first["payload"], "{\"n\":1}");
    }

    #[tokio::test]
    async fn test_tcp_sink_unreachable() {
        let config = DeliveryConfig {
            broker_addresses: vec!["127.0.0.1:1".to_string()],
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let mut sink = TcpSink::new(&config);

        let err = sink.connect().await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unavailable(_)));
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(!sink.is_connected());
        assert!(sink.send(&[entry("{}")]).await.is_err());
    }
}
