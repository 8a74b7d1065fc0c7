//! Runtime state of a single resource group.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::SchedulingPolicy;
use crate::core::template::{CompiledTemplate, GroupSpec};
use crate::core::{QueryHandle, ResourceGroupId, ResourceGroupState, Spawn};
use crate::util::serde::{Priority, QueryId};

/// Stable index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeIndex(pub(crate) usize);

/// A query waiting in a leaf.
pub(crate) struct QueuedQuery {
    pub handle: QueryHandle,
    pub executor: Arc<dyn Spawn>,
    /// Global arrival sequence; lower arrived earlier.
    pub seq: u64,
    pub enqueued_at_ms: u128,
}

/// Book-keeping for a query holding a slot in a leaf.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunningEntry {
    pub memory_bytes: u64,
    pub started_at_ms: u128,
}

/// Waiting work beneath a node, ordered both by arrival and by priority.
///
/// Each node (leaf or internal) keeps an index covering its whole subtree so
/// policies can compare children without walking them.
#[derive(Debug, Default)]
pub(crate) struct PendingIndex {
    by_arrival: BTreeSet<u64>,
    by_priority: BTreeSet<(Reverse<Priority>, u64)>,
}

impl PendingIndex {
    pub fn insert(&mut self, seq: u64, priority: Priority) {
        self.by_arrival.insert(seq);
        self.by_priority.insert((Reverse(priority), seq));
    }

    pub fn remove(&mut self, seq: u64, priority: Priority) -> bool {
        let removed = self.by_arrival.remove(&seq);
        self.by_priority.remove(&(Reverse(priority), seq));
        removed
    }

    pub fn len(&self) -> usize {
        self.by_arrival.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_arrival.is_empty()
    }

    /// Earliest arrival waiting.
    pub fn oldest(&self) -> Option<u64> {
        self.by_arrival.first().copied()
    }

    /// Highest priority waiting, earliest arrival among equals.
    pub fn top(&self) -> Option<(Priority, u64)> {
        self.by_priority.first().map(|(Reverse(p), seq)| (*p, *seq))
    }

    /// Next query a leaf with `policy` should admit.
    pub fn next(&self, policy: SchedulingPolicy) -> Option<u64> {
        match policy {
            SchedulingPolicy::QueryPriority => self.top().map(|(_, seq)| seq),
            SchedulingPolicy::Fifo | SchedulingPolicy::Weighted | SchedulingPolicy::WeightedFair => {
                self.oldest()
            }
        }
    }
}

/// Lifetime counters of a group.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GroupStats {
    pub admitted: u64,
    pub rejected: u64,
    pub finished: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// One node of the resource group tree.
pub(crate) struct GroupNode {
    pub id: ResourceGroupId,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    /// `None` for the root and for groups whose template was removed.
    pub template: Option<Arc<CompiledTemplate>>,
    pub spec: GroupSpec,
    pub leaf: bool,
    /// Leaf only: waiting queries keyed by arrival sequence.
    pub waiting: HashMap<u64, QueuedQuery>,
    /// Leaf only: queries holding a slot.
    pub running: HashMap<QueryId, RunningEntry>,
    pub pending: PendingIndex,
    pub running_count: u32,
    /// Memory attributed to running queries anywhere in the subtree.
    pub memory_usage_bytes: u64,
    /// Weighted-fair service received, scaled by weight.
    pub service_debt: u64,
    /// Weighted-fair clock of this node's children.
    pub virtual_time: u64,
    /// Creation order among all nodes; breaks ties between siblings.
    pub created_seq: u64,
    pub stats: GroupStats,
}

impl GroupNode {
    pub fn new(
        id: ResourceGroupId,
        parent: Option<NodeIndex>,
        template: Option<Arc<CompiledTemplate>>,
        spec: GroupSpec,
        leaf: bool,
        created_seq: u64,
    ) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            template,
            spec,
            leaf,
            waiting: HashMap::new(),
            running: HashMap::new(),
            pending: PendingIndex::default(),
            running_count: 0,
            memory_usage_bytes: 0,
            service_debt: 0,
            virtual_time: 0,
            created_seq,
            stats: GroupStats::default(),
        }
    }

    pub fn memory_throttled(&self) -> bool {
        self.spec
            .soft_memory_limit_bytes
            .is_some_and(|limit| self.memory_usage_bytes >= limit)
    }

    /// Whether another query may start somewhere in this subtree.
    pub fn can_run_more(&self) -> bool {
        self.running_count < self.spec.hard_concurrency_limit && !self.memory_throttled()
    }

    /// Whether another query may wait somewhere in this subtree.
    pub fn can_queue_more(&self) -> bool {
        self.pending.len() < self.spec.max_queued
    }

    pub fn state(&self) -> ResourceGroupState {
        if self.can_run_more() {
            ResourceGroupState::CanRun
        } else if self.can_queue_more() {
            ResourceGroupState::CanQueue
        } else {
            ResourceGroupState::Full
        }
    }

    /// Idle and unreachable through the current configuration.
    pub fn collectable(&self) -> bool {
        self.parent.is_some()
            && self.template.is_none()
            && self.children.is_empty()
            && self.running_count == 0
            && self.pending.is_empty()
    }
}
