//! Query handles, lifecycle callbacks, and the running-query completion token.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::core::ResourceGroupId;
use crate::util::serde::{Priority, QueryId};

/// Resource estimate attached to a query by the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    /// Estimated peak memory in bytes.
    pub peak_memory_bytes: Option<u64>,
    /// Estimated execution time in milliseconds.
    pub execution_time_ms: Option<u64>,
}

/// How a running query left its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOutcome {
    /// Completed normally.
    Finished,
    /// Failed with a reason.
    Failed(String),
    /// Cancelled, or its token was dropped without a result.
    Cancelled,
}

/// Where a query stands after a successful submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryState {
    /// Waiting for a slot.
    Queued,
    /// Admitted; the started-callback has been dispatched.
    Running,
}

/// Callbacks the scheduler invokes on a submitted query.
///
/// Implementations belong to the engine; the scheduler never looks at the
/// query beyond its handle.
pub trait QueryLifecycle: Send + Sync + 'static {
    /// Called on the query's executor once a slot has been granted.
    ///
    /// The query holds its slot until `running` is finished, failed or dropped.
    fn on_started(&self, running: RunningQuery);

    /// Called when a queued query is removed before it ever ran.
    fn on_cancelled(&self, reason: &str) {
        let _ = reason;
    }
}

/// A query submitted for admission.
#[derive(Clone)]
pub struct QueryHandle {
    id: QueryId,
    priority: Priority,
    estimate: ResourceEstimate,
    lifecycle: Arc<dyn QueryLifecycle>,
}

impl QueryHandle {
    /// Handle with normal priority and no estimate.
    pub fn new(id: impl Into<QueryId>, lifecycle: Arc<dyn QueryLifecycle>) -> Self {
        Self {
            id: id.into(),
            priority: Priority::Normal,
            estimate: ResourceEstimate::default(),
            lifecycle,
        }
    }

    /// Set the query priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the resource estimate.
    #[must_use]
    pub fn with_estimate(mut self, estimate: ResourceEstimate) -> Self {
        self.estimate = estimate;
        self
    }

    /// Query identifier.
    #[must_use]
    pub const fn id(&self) -> &QueryId {
        &self.id
    }

    /// Query priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Resource estimate.
    #[must_use]
    pub const fn estimate(&self) -> ResourceEstimate {
        self.estimate
    }

    pub(crate) fn lifecycle(&self) -> &Arc<dyn QueryLifecycle> {
        &self.lifecycle
    }
}

impl fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandle")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("estimate", &self.estimate)
            .finish_non_exhaustive()
    }
}

/// Event delivered into the serialized scheduling path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CoreEvent {
    Terminated {
        query_id: QueryId,
        outcome: QueryOutcome,
    },
    MemoryUsage {
        query_id: QueryId,
        bytes: u64,
    },
}

/// Receiver of events posted by running-query tokens.
pub(crate) trait EventSink: Send + Sync {
    fn post(&self, event: CoreEvent);
}

/// Slot held by an admitted query.
///
/// Report completion with [`finish`](Self::finish) or [`fail`](Self::fail);
/// dropping the token releases the slot as cancelled. Each token releases its
/// slot exactly once.
pub struct RunningQuery {
    query_id: QueryId,
    group: ResourceGroupId,
    sink: Weak<dyn EventSink>,
    released: bool,
}

impl RunningQuery {
    pub(crate) fn new(query_id: QueryId, group: ResourceGroupId, sink: Weak<dyn EventSink>) -> Self {
        Self {
            query_id,
            group,
            sink,
            released: false,
        }
    }

    /// Id of the admitted query.
    #[must_use]
    pub const fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Leaf group the query runs in.
    #[must_use]
    pub const fn group(&self) -> &ResourceGroupId {
        &self.group
    }

    /// Report the query's current memory reservation.
    pub fn report_memory_usage(&self, bytes: u64) {
        if let Some(sink) = self.sink.upgrade() {
            sink.post(CoreEvent::MemoryUsage {
                query_id: self.query_id.clone(),
                bytes,
            });
        }
    }

    /// Release the slot after successful completion.
    pub fn finish(mut self) {
        self.release(QueryOutcome::Finished);
    }

    /// Release the slot after a failure.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.release(QueryOutcome::Failed(reason.into()));
    }

    /// Release the slot after cancellation.
    pub fn cancel(mut self) {
        self.release(QueryOutcome::Cancelled);
    }

    fn release(&mut self, outcome: QueryOutcome) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(sink) = self.sink.upgrade() {
            sink.post(CoreEvent::Terminated {
                query_id: self.query_id.clone(),
                outcome,
            });
        }
    }
}

impl Drop for RunningQuery {
    fn drop(&mut self) {
        self.release(QueryOutcome::Cancelled);
    }
}

impl fmt::Debug for RunningQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningQuery")
            .field("query_id", &self.query_id)
            .field("group", &self.group)
            .field("released", &self.released)
            .finish()
    }
}
