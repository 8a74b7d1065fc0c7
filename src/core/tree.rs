//! Arena-backed resource group tree and its admission bookkeeping.
//!
//! Nodes live in a slot vector and refer to each other by [`NodeIndex`]; a
//! parent owns its child indices while children keep a plain index back. All
//! counters are maintained incrementally along the leaf-to-root path, so every
//! operation here is proportional to tree depth rather than tree size.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SchedulingPolicy;
use crate::core::group::{GroupNode, NodeIndex, QueuedQuery, RunningEntry};
use crate::core::policy::{strategy, Candidate};
use crate::core::template::{match_segment, CompiledTemplate, GroupSpec, TemplateForest};
use crate::core::{
    QueryHandle, QueryOutcome, ResourceGroupId, ResourceGroupInfo, SchedulerError, Spawn,
};
use crate::util::serde::QueryId;

/// A query that has been granted a slot and must be handed to its executor.
pub(crate) struct Dispatch {
    pub handle: QueryHandle,
    pub executor: Arc<dyn Spawn>,
    pub group: ResourceGroupId,
}

/// Outcome of a successful submit.
pub(crate) enum Admission {
    Started(Dispatch),
    Queued,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Queued(u64),
    Running,
}

#[derive(Debug, Clone, Copy)]
struct Location {
    leaf: NodeIndex,
    phase: Phase,
}

fn violation(message: impl Into<String>) -> SchedulerError {
    SchedulerError::InvariantViolation(message.into())
}

fn checked(value: Option<u64>, what: &str, group: &ResourceGroupId) -> Result<u64, SchedulerError> {
    value.ok_or_else(|| violation(format!("{what} out of range in resource group `{group}`")))
}

pub(crate) struct ResourceGroupTree {
    nodes: Vec<Option<GroupNode>>,
    free: Vec<usize>,
    by_id: HashMap<ResourceGroupId, NodeIndex>,
    root: NodeIndex,
    forest: Arc<TemplateForest>,
    locations: HashMap<QueryId, Location>,
    orphans: HashSet<NodeIndex>,
    next_arrival: u64,
    next_node_seq: u64,
}

impl ResourceGroupTree {
    pub fn new(forest: Arc<TemplateForest>, root_policy: SchedulingPolicy) -> Self {
        let root_id = ResourceGroupId::root();
        let root = GroupNode::new(
            root_id.clone(),
            None,
            None,
            GroupSpec::unbounded(root_policy),
            false,
            0,
        );
        let mut by_id = HashMap::new();
        by_id.insert(root_id, NodeIndex(0));
        Self {
            nodes: vec![Some(root)],
            free: Vec::new(),
            by_id,
            root: NodeIndex(0),
            forest,
            locations: HashMap::new(),
            orphans: HashSet::new(),
            next_arrival: 0,
            next_node_seq: 1,
        }
    }

    pub const fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, idx: NodeIndex) -> Result<&GroupNode, SchedulerError> {
        self.nodes
            .get(idx.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| violation(format!("stale node index {}", idx.0)))
    }

    fn node_mut(&mut self, idx: NodeIndex) -> Result<&mut GroupNode, SchedulerError> {
        self.nodes
            .get_mut(idx.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| violation(format!("stale node index {}", idx.0)))
    }

    fn live(&self) -> impl Iterator<Item = (NodeIndex, &GroupNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|n| (NodeIndex(slot), n)))
    }

    /// Number of materialized groups, root included.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Existing node for `id`, without materializing anything.
    pub fn find(&self, id: &ResourceGroupId) -> Option<NodeIndex> {
        self.by_id.get(id).copied()
    }

    /// Resolve `id` to a node, materializing missing segments from templates.
    pub fn resolve(&mut self, id: &ResourceGroupId) -> Result<NodeIndex, SchedulerError> {
        let mut current = self.root;
        let mut prefix = ResourceGroupId::root();
        for segment in id.segments() {
            prefix = prefix.child(segment.clone());
            if let Some(existing) = self.find(&prefix) {
                if self.orphans.contains(&existing) {
                    return Err(SchedulerError::UnknownGroup(prefix));
                }
                current = existing;
                continue;
            }
            let parent = self.node(current)?;
            let templates: &[Arc<CompiledTemplate>] = match &parent.template {
                Some(template) => template.sub_groups(),
                None if parent.parent.is_none() => self.forest.roots(),
                None => &[],
            };
            let template = match_segment(templates, segment).cloned().ok_or_else(|| {
                SchedulerError::UnknownTemplate {
                    parent: parent.id.clone(),
                    segment: segment.clone(),
                }
            })?;
            current = self.materialize(current, prefix.clone(), template)?;
        }
        Ok(current)
    }

    fn materialize(
        &mut self,
        parent: NodeIndex,
        id: ResourceGroupId,
        template: Arc<CompiledTemplate>,
    ) -> Result<NodeIndex, SchedulerError> {
        let seq = self.next_node_seq;
        self.next_node_seq += 1;
        let node = GroupNode::new(
            id.clone(),
            Some(parent),
            Some(Arc::clone(&template)),
            template.spec().clone(),
            template.is_leaf(),
            seq,
        );
        let idx = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeIndex(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeIndex(self.nodes.len() - 1)
            }
        };
        self.node_mut(parent)?.children.push(idx);
        debug!(group = %id, template = template.name(), "materialized resource group");
        self.by_id.insert(id, idx);
        Ok(idx)
    }

    /// `idx` followed by its ancestors up to and including the root.
    fn path(&self, idx: NodeIndex) -> Result<Vec<NodeIndex>, SchedulerError> {
        let mut path = vec![idx];
        let mut current = self.node(idx)?.parent;
        while let Some(parent) = current {
            path.push(parent);
            current = self.node(parent)?.parent;
        }
        Ok(path)
    }

    /// Snapshots of the configured ancestry of `idx`, root-most first,
    /// synthetic root excluded.
    pub fn path_info(&self, idx: NodeIndex) -> Result<Vec<ResourceGroupInfo>, SchedulerError> {
        let mut snapshots = Vec::new();
        for step in self.path(idx)? {
            if self.node(step)?.parent.is_some() {
                snapshots.push(self.info(step)?);
            }
        }
        snapshots.reverse();
        Ok(snapshots)
    }

    pub fn submit(
        &mut self,
        leaf: NodeIndex,
        handle: QueryHandle,
        executor: Arc<dyn Spawn>,
        now_ms: u128,
    ) -> Result<Admission, SchedulerError> {
        if self.locations.contains_key(handle.id()) {
            return Err(SchedulerError::DuplicateQuery(handle.id().clone()));
        }
        let node = self.node(leaf)?;
        if !node.leaf {
            return Err(SchedulerError::Configuration(format!(
                "resource group `{}` is not a leaf group",
                node.id
            )));
        }
        let path = self.path(leaf)?;
        let mut immediate = node.waiting.is_empty();
        let mut full = None;
        for &step in &path {
            let node = self.node(step)?;
            immediate &= node.can_run_more();
            if full.is_none() && !node.can_queue_more() {
                full = Some(step);
            }
        }

        let seq = self.next_arrival;
        self.next_arrival += 1;
        let queued = QueuedQuery {
            handle,
            executor,
            seq,
            enqueued_at_ms: now_ms,
        };

        if immediate {
            // Skipping the queue still counts as the path becoming active.
            self.activate(&path)?;
            let dispatch = self.start(&path, queued, now_ms)?;
            return Ok(Admission::Started(dispatch));
        }
        if let Some(full) = full {
            let node = self.node_mut(full)?;
            node.stats.rejected += 1;
            return Err(SchedulerError::Rejection {
                group: node.id.clone(),
                max_queued: node.spec.max_queued,
            });
        }
        self.enqueue(&path, queued)?;
        Ok(Admission::Queued)
    }

    /// Give each newly active child a fair starting point under its parent.
    fn activate(&mut self, path: &[NodeIndex]) -> Result<(), SchedulerError> {
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            if !self.node(child)?.pending.is_empty() {
                continue;
            }
            let parent_node = self.node(parent)?;
            let (policy, virtual_time) = (parent_node.spec.scheduling_policy, parent_node.virtual_time);
            strategy(policy).on_activated(virtual_time, &mut self.node_mut(child)?.service_debt);
        }
        Ok(())
    }

    fn enqueue(&mut self, path: &[NodeIndex], queued: QueuedQuery) -> Result<(), SchedulerError> {
        self.activate(path)?;
        let (seq, priority) = (queued.seq, queued.handle.priority());
        for &step in path {
            self.node_mut(step)?.pending.insert(seq, priority);
        }
        let leaf = path[0];
        let query_id = queued.handle.id().clone();
        let node = self.node_mut(leaf)?;
        debug!(
            group = %node.id,
            query = %query_id,
            queued = node.pending.len(),
            "query queued"
        );
        node.waiting.insert(seq, queued);
        self.locations.insert(
            query_id,
            Location {
                leaf,
                phase: Phase::Queued(seq),
            },
        );
        Ok(())
    }

    /// Mark `queued` running along `path`, charging each level's policy.
    fn start(
        &mut self,
        path: &[NodeIndex],
        queued: QueuedQuery,
        now_ms: u128,
    ) -> Result<Dispatch, SchedulerError> {
        let leaf = path[0];
        for pair in path.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            let weight = self.node(child)?.spec.scheduling_weight;
            let parent_node = self.node(parent)?;
            let (policy, mut virtual_time) = (parent_node.spec.scheduling_policy, parent_node.virtual_time);
            strategy(policy).on_granted(&mut virtual_time, &mut self.node_mut(child)?.service_debt, weight);
            self.node_mut(parent)?.virtual_time = virtual_time;
        }
        for &step in path {
            let node = self.node_mut(step)?;
            node.running_count = node
                .running_count
                .checked_add(1)
                .ok_or_else(|| violation(format!("running count overflow in `{}`", node.id)))?;
            node.stats.admitted += 1;
        }

        let query_id = queued.handle.id().clone();
        let waited_ms = now_ms.saturating_sub(queued.enqueued_at_ms);
        let node = self.node_mut(leaf)?;
        node.running.insert(
            query_id.clone(),
            RunningEntry {
                memory_bytes: 0,
                started_at_ms: now_ms,
            },
        );
        let group = node.id.clone();
        info!(
            group = %group,
            query = %query_id,
            running = node.running_count,
            waited_ms = u64::try_from(waited_ms).unwrap_or(u64::MAX),
            "query admitted"
        );
        self.locations.insert(
            query_id,
            Location {
                leaf,
                phase: Phase::Running,
            },
        );
        Ok(Dispatch {
            handle: queued.handle,
            executor: queued.executor,
            group,
        })
    }

    /// Take the waiting query `seq` out of `leaf` and every ancestor index.
    fn dequeue(&mut self, path: &[NodeIndex], seq: u64) -> Result<QueuedQuery, SchedulerError> {
        let leaf = path[0];
        let node = self.node_mut(leaf)?;
        let queued = node.waiting.remove(&seq).ok_or_else(|| {
            violation(format!("arrival {seq} indexed but not waiting in `{}`", node.id))
        })?;
        let priority = queued.handle.priority();
        for &step in path {
            let node = self.node_mut(step)?;
            if !node.pending.remove(seq, priority) {
                return Err(violation(format!(
                    "arrival {seq} missing from pending index of `{}`",
                    node.id
                )));
            }
        }
        Ok(queued)
    }

    /// Start the waiting query `seq` in `leaf`.
    pub fn promote(&mut self, leaf: NodeIndex, seq: u64, now_ms: u128) -> Result<Dispatch, SchedulerError> {
        let path = self.path(leaf)?;
        let queued = self.dequeue(&path, seq)?;
        self.start(&path, queued, now_ms)
    }

    /// Remove a waiting query. `Ok(None)` if it is not waiting.
    pub fn cancel_queued(
        &mut self,
        query_id: &QueryId,
    ) -> Result<Option<(ResourceGroupId, QueuedQuery)>, SchedulerError> {
        let Some(&Location {
            leaf,
            phase: Phase::Queued(seq),
        }) = self.locations.get(query_id)
        else {
            return Ok(None);
        };
        let path = self.path(leaf)?;
        let queued = self.dequeue(&path, seq)?;
        self.locations.remove(query_id);
        for &step in &path {
            self.node_mut(step)?.stats.cancelled += 1;
        }
        let group = self.node(leaf)?.id.clone();
        debug!(group = %group, query = %query_id, "queued query cancelled");
        Ok(Some((group, queued)))
    }

    /// Release the slot held by a running query.
    pub fn terminate(
        &mut self,
        query_id: &QueryId,
        outcome: &QueryOutcome,
    ) -> Result<ResourceGroupId, SchedulerError> {
        let leaf = match self.locations.get(query_id) {
            Some(&Location {
                leaf,
                phase: Phase::Running,
            }) => leaf,
            _ => return Err(violation(format!("completion for query `{query_id}` that is not running"))),
        };
        let path = self.path(leaf)?;
        let node = self.node_mut(leaf)?;
        let entry = node.running.remove(query_id).ok_or_else(|| {
            violation(format!("query `{query_id}` located in `{}` but not running there", node.id))
        })?;
        for &step in &path {
            let node = self.node_mut(step)?;
            node.running_count = node
                .running_count
                .checked_sub(1)
                .ok_or_else(|| violation(format!("running count underflow in `{}`", node.id)))?;
            node.memory_usage_bytes = checked(
                node.memory_usage_bytes.checked_sub(entry.memory_bytes),
                "memory usage",
                &node.id,
            )?;
            match outcome {
                QueryOutcome::Finished => node.stats.finished += 1,
                QueryOutcome::Failed(_) => node.stats.failed += 1,
                QueryOutcome::Cancelled => node.stats.cancelled += 1,
            }
        }
        self.locations.remove(query_id);
        let group = self.node(leaf)?.id.clone();
        debug!(
            group = %group,
            query = %query_id,
            outcome = ?outcome,
            started_at_ms = u64::try_from(entry.started_at_ms).unwrap_or(u64::MAX),
            "query released slot"
        );
        Ok(group)
    }

    /// Replace the memory attributed to a running query.
    pub fn record_memory(&mut self, query_id: &QueryId, bytes: u64) -> Result<(), SchedulerError> {
        let leaf = match self.locations.get(query_id) {
            Some(&Location {
                leaf,
                phase: Phase::Running,
            }) => leaf,
            _ => return Err(violation(format!("memory report for query `{query_id}` that is not running"))),
        };
        let path = self.path(leaf)?;
        let node = self.node_mut(leaf)?;
        let entry = node.running.get_mut(query_id).ok_or_else(|| {
            violation(format!("query `{query_id}` located in `{}` but not running there", node.id))
        })?;
        let previous = std::mem::replace(&mut entry.memory_bytes, bytes);
        for &step in &path {
            let node = self.node_mut(step)?;
            let was_throttled = node.memory_throttled();
            let usage = checked(node.memory_usage_bytes.checked_sub(previous), "memory usage", &node.id)?;
            node.memory_usage_bytes = checked(usage.checked_add(bytes), "memory usage", &node.id)?;
            let throttled = node.memory_throttled();
            if throttled != was_throttled {
                info!(
                    group = %node.id,
                    usage_bytes = node.memory_usage_bytes,
                    throttled,
                    "memory throttling changed"
                );
            }
        }
        Ok(())
    }

    /// Merge a new template forest into the live tree.
    ///
    /// Either the whole reload applies or nothing changes.
    pub fn apply_config(
        &mut self,
        forest: Arc<TemplateForest>,
        root_policy: SchedulingPolicy,
    ) -> Result<(), SchedulerError> {
        let mut plan = Vec::new();
        for (idx, node) in self.live() {
            if node.parent.is_none() {
                continue;
            }
            let template = forest.lookup(node.id.segments());
            if let Some(template) = &template {
                if node.leaf && !template.is_leaf() && !(node.waiting.is_empty() && node.running.is_empty()) {
                    return Err(SchedulerError::Configuration(format!(
                        "resource group `{}` holds queries and cannot gain sub-groups",
                        node.id
                    )));
                }
                if !node.leaf && template.is_leaf() && !node.children.is_empty() {
                    return Err(SchedulerError::Configuration(format!(
                        "resource group `{}` has sub-groups and cannot become a leaf",
                        node.id
                    )));
                }
            }
            plan.push((idx, template));
        }

        let mut policy_changed = Vec::new();
        let root = self.root;
        let root_node = self.node_mut(root)?;
        if root_node.spec.scheduling_policy != root_policy {
            root_node.spec.scheduling_policy = root_policy;
            policy_changed.push(root);
        }

        let mut orphaned = 0_usize;
        for (idx, template) in plan {
            let node = self.node_mut(idx)?;
            match template {
                Some(template) => {
                    if node.spec.scheduling_policy != template.spec().scheduling_policy {
                        policy_changed.push(idx);
                    }
                    node.spec = template.spec().clone();
                    node.leaf = template.is_leaf();
                    node.template = Some(template);
                    self.orphans.remove(&idx);
                }
                None => {
                    node.template = None;
                    if self.orphans.insert(idx) {
                        orphaned += 1;
                    }
                }
            }
        }

        // Fair-share history is meaningless under a different policy.
        for idx in policy_changed {
            let children = {
                let node = self.node_mut(idx)?;
                node.virtual_time = 0;
                node.children.clone()
            };
            for child in children {
                self.node_mut(child)?.service_debt = 0;
            }
        }

        self.forest = forest;
        info!(groups = self.len(), orphaned, "resource group configuration applied");
        Ok(())
    }

    /// Drop orphaned groups that are idle and childless, bottom-up.
    pub fn collect_garbage(&mut self) -> Result<usize, SchedulerError> {
        let mut removed = 0;
        loop {
            let victims: Vec<NodeIndex> = self
                .orphans
                .iter()
                .copied()
                .filter(|&idx| self.node(idx).is_ok_and(GroupNode::collectable))
                .collect();
            if victims.is_empty() {
                break;
            }
            for idx in victims {
                self.remove_node(idx)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "collected idle resource groups");
        }
        Ok(removed)
    }

    fn remove_node(&mut self, idx: NodeIndex) -> Result<(), SchedulerError> {
        let node = self
            .nodes
            .get_mut(idx.0)
            .and_then(Option::take)
            .ok_or_else(|| violation(format!("stale node index {}", idx.0)))?;
        self.orphans.remove(&idx);
        self.by_id.remove(&node.id);
        if let Some(parent) = node.parent {
            self.node_mut(parent)?.children.retain(|&child| child != idx);
        }
        self.free.push(idx.0);
        debug!(group = %node.id, "removed resource group");
        Ok(())
    }

    /// Scheduling summary of `idx` as seen by its parent.
    pub fn candidate(&self, idx: NodeIndex) -> Result<Option<Candidate>, SchedulerError> {
        let node = self.node(idx)?;
        let (Some(oldest_arrival), Some((top_priority, top_arrival))) =
            (node.pending.oldest(), node.pending.top())
        else {
            return Ok(None);
        };
        Ok(Some(Candidate {
            node: idx,
            weight: node.spec.scheduling_weight,
            oldest_arrival,
            top_priority,
            top_arrival,
            service_debt: node.service_debt,
            created_seq: node.created_seq,
        }))
    }

    pub fn info(&self, idx: NodeIndex) -> Result<ResourceGroupInfo, SchedulerError> {
        let node = self.node(idx)?;
        let sub_groups = node
            .children
            .iter()
            .map(|&child| self.node(child).map(|c| c.id.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ResourceGroupInfo {
            id: node.id.clone(),
            state: node.state(),
            leaf: node.leaf,
            template_removed: self.orphans.contains(&idx),
            scheduling_policy: node.spec.scheduling_policy,
            scheduling_weight: node.spec.scheduling_weight,
            hard_concurrency_limit: node.spec.hard_concurrency_limit,
            max_queued: node.spec.max_queued,
            soft_memory_limit_bytes: node.spec.soft_memory_limit_bytes,
            memory_usage_bytes: node.memory_usage_bytes,
            running_queries: node.running_count,
            queued_queries: node.pending.len(),
            total_admitted: node.stats.admitted,
            total_rejected: node.stats.rejected,
            total_finished: node.stats.finished,
            total_failed: node.stats.failed,
            total_cancelled: node.stats.cancelled,
            sub_groups,
        })
    }

    /// Verify the aggregate counters of every node against its children.
    pub fn check_invariants(&self) -> Result<(), SchedulerError> {
        for (idx, node) in self.live() {
            let (running, pending, memory) = if node.leaf && node.children.is_empty() {
                (
                    u64::try_from(node.running.len()).unwrap_or(u64::MAX),
                    node.waiting.len(),
                    node.running.values().map(|e| e.memory_bytes).sum::<u64>(),
                )
            } else {
                let mut totals = (0_u64, 0_usize, 0_u64);
                for &child in &node.children {
                    let child_node = self.node(child)?;
                    if child_node.parent != Some(idx) {
                        return Err(violation(format!(
                            "`{}` lists `{}` as a child but is not its parent",
                            node.id, child_node.id
                        )));
                    }
                    totals.0 += u64::from(child_node.running_count);
                    totals.1 += child_node.pending.len();
                    totals.2 += child_node.memory_usage_bytes;
                }
                totals
            };
            if running != u64::from(node.running_count) {
                return Err(violation(format!(
                    "`{}` counts {} running but holds {running}",
                    node.id, node.running_count
                )));
            }
            if pending != node.pending.len() {
                return Err(violation(format!(
                    "`{}` counts {} queued but holds {pending}",
                    node.id,
                    node.pending.len()
                )));
            }
            if memory != node.memory_usage_bytes {
                return Err(violation(format!(
                    "`{}` attributes {} bytes but holds {memory}",
                    node.id, node.memory_usage_bytes
                )));
            }
        }
        Ok(())
    }
}
