//! Per-evaluation audit event buffer

use parking_lot::Mutex;
use warden_audit::AuditEvent;

/// Accumulates the audit events emitted during one `authorize` call
///
/// The engine captures through a shared reference, so capture order is the
/// order in which the engine emitted. Nothing is deduplicated.
#[derive(Debug, Default)]
pub struct AuditCollector {
    events: Mutex<Vec<AuditEvent>>,
}

impl AuditCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn capture(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }

    /// All captured events in capture order; leaves the collector empty
    pub fn drain_all(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// The last captured event; the rest are discarded
    pub fn drain_most_recent(&self) -> Option<AuditEvent> {
        let mut events = self.events.lock();
        let last = events.pop();
        events.clear();
        last
    }

    /// Events that become permanent audit records for a decision
    ///
    /// An allow keeps everything captured. A deny keeps only the most recent
    /// event: the decisive check, not the exploratory ones before it.
    pub fn select_for_outcome(&self, allowed: bool) -> Vec<AuditEvent> {
        if allowed {
            self.drain_all()
        } else {
            self.drain_most_recent().into_iter().collect()
        }
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
