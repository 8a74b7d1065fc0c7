//! Audit sink implementations.
//!
//! Every admission decision and slot release can be mirrored into an
//! [`AuditSink`]. The in-memory sink keeps a bounded window for tests and
//! diagnostics.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::ResourceGroupId;
use crate::util::clock::now_ms;
use crate::util::serde::QueryId;

/// What happened to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionAction {
    /// Waiting for a slot.
    Queued,
    /// Granted a slot.
    Started,
    /// Refused because a queue was full.
    Rejected,
    /// Released its slot after completing.
    Finished,
    /// Released its slot after failing.
    Failed,
    /// Removed from a queue, or released its slot without a result.
    Cancelled,
}

impl fmt::Display for AdmissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Rejected => "rejected",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionEvent {
    /// Query identifier.
    pub query_id: QueryId,
    /// Group the decision was made in. For rejections, the group whose queue
    /// was full.
    pub group: ResourceGroupId,
    /// Action taken.
    pub action: AdmissionAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AdmissionEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AdmissionEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events for one query, oldest first.
    pub fn events_for(&self, query_id: &QueryId) -> Vec<AdmissionAction> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.query_id == query_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AdmissionEvent) {
        let mut events = self.events.lock();
        if self.max_events == 0 {
            return;
        }
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event stamped with the current time.
pub fn build_admission_event(
    query_id: &QueryId,
    group: &ResourceGroupId,
    action: AdmissionAction,
    detail: Option<String>,
) -> AdmissionEvent {
    AdmissionEvent {
        query_id: query_id.clone(),
        group: group.clone(),
        action,
        created_at_ms: now_ms(),
        detail,
    }
}
