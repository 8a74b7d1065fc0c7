//! Read-only snapshots exposed for introspection.

use serde::{Deserialize, Serialize};

use crate::config::SchedulingPolicy;
use crate::core::ResourceGroupId;

/// Admission state of a group at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceGroupState {
    /// A new query could start now.
    CanRun,
    /// A new query would wait.
    CanQueue,
    /// A new query would be rejected.
    Full,
}

/// Point-in-time copy of a group's limits and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupInfo {
    /// Group id.
    pub id: ResourceGroupId,
    /// Admission state.
    pub state: ResourceGroupState,
    /// Whether the group hosts queries directly.
    pub leaf: bool,
    /// Whether a reload removed the group's template.
    pub template_removed: bool,
    /// Scheduling policy in effect.
    pub scheduling_policy: SchedulingPolicy,
    /// Weight relative to siblings.
    pub scheduling_weight: u32,
    /// Concurrency limit.
    pub hard_concurrency_limit: u32,
    /// Queue limit.
    pub max_queued: usize,
    /// Soft memory limit in bytes.
    pub soft_memory_limit_bytes: Option<u64>,
    /// Memory attributed to running queries in the subtree.
    pub memory_usage_bytes: u64,
    /// Running queries in the subtree.
    pub running_queries: u32,
    /// Waiting queries in the subtree.
    pub queued_queries: usize,
    /// Queries admitted over the group's lifetime.
    pub total_admitted: u64,
    /// Submissions rejected by this group's queue limit.
    pub total_rejected: u64,
    /// Queries that left the group successfully.
    pub total_finished: u64,
    /// Queries that failed while running.
    pub total_failed: u64,
    /// Queries cancelled while queued or running.
    pub total_cancelled: u64,
    /// Direct children, in creation order.
    pub sub_groups: Vec<ResourceGroupId>,
}
