//! Error types for admission and scheduling operations.

use thiserror::Error;

use crate::core::ResourceGroupId;
use crate::util::serde::QueryId;

/// Errors produced by the resource group manager and its components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No selection rule matched the query's attributes.
    #[error("no selector matched: {0}")]
    SelectionFailure(String),
    /// The target group, or one of its ancestors, has a full queue.
    #[error("queue full for resource group {group} (max_queued={max_queued})")]
    Rejection {
        /// Group whose queue limit was hit.
        group: ResourceGroupId,
        /// Configured queue limit of that group.
        max_queued: usize,
    },
    /// The group path does not exist and cannot be materialized.
    #[error("unknown resource group: {0}")]
    UnknownGroup(ResourceGroupId),
    /// A path segment matches no configured template.
    #[error("no template matches `{segment}` under resource group `{parent}`")]
    UnknownTemplate {
        /// Deepest group that could be resolved.
        parent: ResourceGroupId,
        /// Segment that failed to match.
        segment: String,
    },
    /// The configuration is malformed; a reload carrying it is rejected.
    #[error("invalid resource group configuration: {0}")]
    Configuration(String),
    /// Internal bookkeeping is corrupt. The manager refuses further work.
    #[error("resource group invariant violated: {0}")]
    InvariantViolation(String),
    /// Operation not available in this process role.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// A query with the same id is already queued or running.
    #[error("query {0} is already registered")]
    DuplicateQuery(QueryId),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
