//! # Warden Audit Delivery
//!
//! Audit evidence for authorization decisions and the asynchronous channel
//! that ships it to a durable sink.
//!
//! ## Features
//!
//! - **Immutable audit events** with a unique id assigned at emission
//! - **Bounded queue** shared by many concurrent producers
//! - **Batched delivery** by size or flush interval, whichever comes first
//! - **Degraded mode** when the sink is unreachable: producers are never failed,
//!   undeliverable records are written to the local log
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_audit::{AuditDeliveryChannel, AuditEvent, DeliveryConfig, TcpSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DeliveryConfig::from_env();
//!     let sink = TcpSink::new(&config);
//!     let channel = AuditDeliveryChannel::new(config, Box::new(sink)).unwrap();
//!
//!     channel.start().await;
//!     channel.enqueue(AuditEvent::new("alice", "read", "orders", true));
//!     channel.stop().await;
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod sink;

pub use channel::{AuditDeliveryChannel, DeliveryStats, EnqueueOutcome, QueueEntry};
pub use config::{DeliveryConfig, OverflowPolicy};
pub use error::{DeliveryError, Result};
pub use event::AuditEvent;
pub use sink::{AuditSink, MemorySink, TcpSink};

/// Destination for audit events selected by an authorization session.
///
/// Implementations must not block the caller beyond a small bounded time.
pub trait AuditWriter: Send + Sync {
    /// Hand over a batch of events for durable delivery
    fn log_events(&self, events: Vec<AuditEvent>);
}
