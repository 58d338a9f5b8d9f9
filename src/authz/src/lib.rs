//! # Warden Authorization Session
//!
//! Per-operation access-control decisions for hierarchical resources
//! (table → column-family → column), with audit evidence routed to an
//! asynchronous delivery channel.
//!
//! ## Pipeline
//!
//! ```text
//! configure → build_request → authorize → publish
//!                                ↓            ↓
//!                         PolicyEngine   AuditWriter (all events on allow,
//!                                ↓                    last event on deny)
//!                         AuditCollector
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut session = AuthorizationSession::new(engine, resolver, channel);
//! session
//!     .identity(Some(Identity::new("alice")))
//!     .access("read")
//!     .table("orders")
//!     .column_family("pii")
//!     .audit_collector(Some(AuditCollector::new()));
//!
//! session.build_request()?;
//! session.authorize().await?;
//! session.publish()?; // Err(AuthzError::AccessDenied { .. }) on denial
//! ```

pub mod collector;
pub mod engine;
pub mod error;
pub mod identity;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use collector::AuditCollector;
pub use engine::PolicyEngine;
pub use error::{AuthzError, Result};
pub use identity::{GroupResolver, Identity, StaticGroupResolver};
pub use session::{AuthorizationSession, SessionState};
pub use types::{AccessRequest, AccessResult, ResourceHierarchy, ResourcePath};

pub use warden_audit::{AuditEvent, AuditWriter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
