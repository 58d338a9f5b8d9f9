//! Asynchronous audit delivery
//!
//! Producers call [`AuditDeliveryChannel::enqueue`] from the decision path;
//! a single background task drains the bounded queue into the sink in
//! batches.
//!
//! # Locking
//!
//! The queue is a `parking_lot::Mutex<VecDeque<_>>`. The lock is held only
//! for a push or a batch split, never across `.await`, so `enqueue` waits at
//! most for another producer's push or the consumer's split.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{DeliveryConfig, OverflowPolicy};
use crate::error::Result;
use crate::event::AuditEvent;
use crate::sink::AuditSink;
use crate::AuditWriter;

/// Log target for audit records that could not be delivered
pub const FALLBACK_TARGET: &str = "warden_audit::fallback";

/// One serialized record waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub topic: String,

    /// Partition key; the acting user
    pub key: Option<String>,

    /// Serialized [`AuditEvent`]
    pub payload: String,
}

/// What `enqueue` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the queue
    Queued,

    /// Queue full; this event was discarded and logged locally
    DroppedNewest,

    /// Queue full; the oldest entry was evicted and logged locally
    DroppedOldest,

    /// Event could not be serialized
    Rejected,
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued | EnqueueOutcome::DroppedOldest)
    }
}

/// Delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Entries accepted into the queue
    pub enqueued: u64,

    /// Entries acknowledged by the sink
    pub delivered: u64,

    /// Entries discarded by the overflow policy or serialization failure
    pub dropped: u64,

    /// Entries written to the local log because the sink was down
    pub fallback_logged: u64,

    /// Entries currently queued
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// State shared between producers, the channel handle and the delivery task
struct Shared {
    queue: Mutex<VecDeque<QueueEntry>>,
    wakeup: Notify,
    flush_pending: AtomicBool,
    degraded: AtomicBool,
    /// Milliseconds since epoch of the last completed flush, 0 if none
    last_flush_ms: AtomicI64,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    fallback_logged: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            flush_pending: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            last_flush_ms: AtomicI64::new(0),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            fallback_logged: AtomicU64::new(0),
        }
    }

    fn take_batch(&self, max: usize) -> Vec<QueueEntry> {
        let mut queue = self.queue.lock();
        let count = queue.len().min(max);
        queue.drain(..count).collect()
    }

    fn take_all(&self) -> Vec<QueueEntry> {
        self.queue.lock().drain(..).collect()
    }

    fn log_fallback(&self, entries: &[QueueEntry]) {
        for entry in entries {
            warn!(target: FALLBACK_TARGET, "AUDIT LOG (sink down): {}", entry.payload);
        }
        self.fallback_logged
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
    }
}

/// Bounded, batching pipe from audit producers to one sink connection
///
/// Lifecycle: `new` → `start` → (running) → `stop`. `start` is idempotent;
/// the sink is released by `stop` on every exit path.
pub struct AuditDeliveryChannel {
    config: DeliveryConfig,
    hostname: String,
    shared: Arc<Shared>,
    sink: Mutex<Option<Box<dyn AuditSink>>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditDeliveryChannel {
    /// Create a channel around a sink. Nothing connects until `start`.
    pub fn new(config: DeliveryConfig, sink: Box<dyn AuditSink>) -> Result<Self> {
        config.validate()?;

        let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".into());
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        info!(
            "Audit delivery channel created: topic={}, brokers={:?}, max_queue_size={}, flush_interval={}ms",
            config.topic_name,
            config.broker_addresses,
            config.max_queue_size,
            config.max_flush_interval_ms
        );

        Ok(Self {
            config,
            hostname,
            shared: Arc::new(Shared::new()),
            sink: Mutex::new(Some(sink)),
            lifecycle: Mutex::new(Lifecycle::Created),
            shutdown_tx,
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Connect the sink and spawn the delivery loop
    ///
    /// A sink that cannot be reached leaves the channel running in degraded
    /// mode. Calling `start` on a running or stopped channel does nothing.
    pub async fn start(&self) {
        let sink = {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Created {
                debug!("Audit delivery start ignored, channel is {:?}", *lifecycle);
                return;
            }
            *lifecycle = Lifecycle::Running;
            self.sink.lock().take()
        };

        let Some(mut sink) = sink else {
            return;
        };

        match sink.connect().await {
            Ok(()) => {
                self.shared.degraded.store(false, Ordering::Relaxed);
                info!("Audit delivery started, topic={}", self.config.topic_name);
            }
            Err(e) => {
                self.shared.degraded.store(true, Ordering::Relaxed);
                error!(
                    "Audit sink unavailable at start, delivering in degraded mode: {}",
                    e
                );
            }
        }

        // stop may have run while the sink was connecting
        let sink = {
            let lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Running {
                Some(sink)
            } else {
                let worker = DeliveryWorker {
                    shared: Arc::clone(&self.shared),
                    sink,
                    topic: self.config.topic_name.clone(),
                    max_batch_size: self.config.max_batch_size,
                    flush_interval: self.config.flush_interval(),
                    shutdown_rx: self.shutdown_tx.subscribe(),
                    reconnect: true,
                };
                *self.worker.lock() = Some(tokio::spawn(worker.run()));
                None
            }
        };

        if let Some(mut sink) = sink {
            debug!("Audit delivery stopped during start, releasing sink");
            if let Err(e) = sink.close().await {
                error!("Error closing audit sink: {}", e);
            }
        }
    }

    /// Drain what is queued, then release the sink
    ///
    /// Waits at most `shutdown_timeout_ms`; entries still queued after that
    /// are written to the local log.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        if previous == Lifecycle::Stopped {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().take();

        match handle {
            Some(mut handle) => {
                let limit = self.config.shutdown_timeout();
                match timeout(limit, &mut handle).await {
                    Ok(Ok(())) => info!("Audit delivery stopped"),
                    Ok(Err(e)) => error!("Audit delivery task failed: {}", e),
                    Err(_) => {
                        handle.abort();
                        warn!("Audit delivery did not drain within {:?}", limit);
                    }
                }
            }
            None => {
                // never started; the sink was never connected
                self.sink.lock().take();
            }
        }

        let abandoned = self.shared.take_all();
        if !abandoned.is_empty() {
            warn!(
                "{} audit records undelivered at shutdown, writing to local log",
                abandoned.len()
            );
            self.shared.log_fallback(&abandoned);
        }
    }

    /// Request an out-of-cycle send of everything queued
    ///
    /// Ignored unless the channel is running.
    pub fn flush(&self) {
        if *self.lifecycle.lock() != Lifecycle::Running {
            debug!("Audit flush ignored, channel is not running");
            return;
        }
        self.shared.flush_pending.store(true, Ordering::Release);
        self.shared.wakeup.notify_one();
    }

    /// Serialize an event and queue it for delivery
    ///
    /// Never waits on the sink. When the queue is full the overflow policy is
    /// applied immediately and the discarded record is logged locally.
    pub fn enqueue(&self, mut event: AuditEvent) -> EnqueueOutcome {
        event.fill_delivery_defaults(&self.hostname);

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize audit event {}: {}", event.event_id, e);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                return EnqueueOutcome::Rejected;
            }
        };

        let entry = QueueEntry {
            topic: self.config.topic_name.clone(),
            key: Some(event.user),
            payload,
        };

        let (outcome, discarded, queued) = {
            let mut queue = self.shared.queue.lock();
            let (outcome, discarded) = if queue.len() < self.config.max_queue_size {
                queue.push_back(entry);
                (EnqueueOutcome::Queued, None)
            } else {
                match self.config.overflow_policy {
                    OverflowPolicy::DropNewest => (EnqueueOutcome::DroppedNewest, Some(entry)),
                    OverflowPolicy::DropOldest => {
                        let evicted = queue.pop_front();
                        queue.push_back(entry);
                        (EnqueueOutcome::DroppedOldest, evicted)
                    }
                }
            };
            (outcome, discarded, queue.len())
        };

        if outcome.is_queued() {
            self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(discarded) = discarded {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: FALLBACK_TARGET,
                "AUDIT LOG (queue full, {:?}): {}", outcome, discarded.payload
            );
        }

        if queued >= self.config.max_batch_size {
            self.shared.wakeup.notify_one();
        }

        outcome
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// Whether the sink is currently unreachable
    pub fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::Relaxed)
    }

    /// Whether a requested flush has not completed yet
    pub fn is_flush_pending(&self) -> bool {
        self.shared.flush_pending.load(Ordering::Acquire)
    }

    /// Completion time of the last flush that had work to do
    pub fn last_flush_time(&self) -> Option<DateTime<Utc>> {
        match self.shared.last_flush_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            fallback_logged: self.shared.fallback_logged.load(Ordering::Relaxed),
            queued: self.queued_len(),
        }
    }
}

impl AuditWriter for AuditDeliveryChannel {
    fn log_events(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.enqueue(event);
        }
    }
}

impl Drop for AuditDeliveryChannel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

/// The single consumer: owns the sink for the lifetime of the loop
struct DeliveryWorker {
    shared: Arc<Shared>,
    sink: Box<dyn AuditSink>,
    topic: String,
    max_batch_size: usize,
    flush_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
    /// Cleared during the final drain after one failed reconnect
    reconnect: bool,
}

impl DeliveryWorker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
                _ = self.shared.wakeup.notified() => {}
            }
            self.drain(false).await;
        }

        debug!("Audit delivery loop exiting, final drain");
        self.drain(true).await;

        if let Err(e) = self.sink.close().await {
            error!("Error closing audit sink: {}", e);
        }
    }

    async fn drain(&mut self, closing: bool) {
        let flush_requested = self.shared.flush_pending.load(Ordering::Acquire);
        let mut sent_any = false;

        loop {
            let batch = self.shared.take_batch(self.max_batch_size);
            if batch.is_empty() {
                break;
            }
            sent_any = true;
            self.deliver(batch, closing).await;
        }

        if sent_any || flush_requested {
            self.shared
                .last_flush_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        if flush_requested {
            self.shared.flush_pending.store(false, Ordering::Release);
        }
    }

    async fn deliver(&mut self, batch: Vec<QueueEntry>, closing: bool) {
        if !self.sink.is_connected() {
            if !self.reconnect {
                self.shared.log_fallback(&batch);
                return;
            }
            if let Err(e) = self.sink.connect().await {
                if !self.shared.degraded.swap(true, Ordering::Relaxed) {
                    warn!("Audit sink unreachable, switching to degraded mode: {}", e);
                }
                if closing {
                    self.reconnect = false;
                }
                self.shared.log_fallback(&batch);
                return;
            }
            if self.shared.degraded.swap(false, Ordering::Relaxed) {
                info!("Audit sink reachable again, leaving degraded mode");
            }
        }

        match self.sink.send(&batch).await {
            Ok(()) => {
                self.shared
                    .delivered
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                debug!("Delivered {} audit records to {}", batch.len(), self.topic);
            }
            Err(e) => {
                self.shared.degraded.store(true, Ordering::Relaxed);
                error!(
                    "Error sending {} audit records to topic {}: {}",
                    batch.len(),
                    self.topic,
                    e
                );
                self.shared.log_fallback(&batch);
            }
        }
    }
}
