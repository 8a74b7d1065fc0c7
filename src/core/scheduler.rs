//! Top-down promotion of waiting queries.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::group::NodeIndex;
use crate::core::policy::strategy;
use crate::core::tree::{Dispatch, ResourceGroupTree};
use crate::core::SchedulerError;

/// Walks the tree from the root handing free slots to waiting queries.
pub(crate) struct Scheduler {
    rng: StdRng,
}

impl Scheduler {
    /// Scheduler whose weighted draws are reproducible for `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Scheduler seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Promote queries until no further promotion is possible.
    pub fn run_pass(
        &mut self,
        tree: &mut ResourceGroupTree,
        now_ms: u128,
    ) -> Result<Vec<Dispatch>, SchedulerError> {
        let mut dispatches = Vec::new();
        while let Some((leaf, seq)) = self.next_promotion(tree, tree.root())? {
            dispatches.push(tree.promote(leaf, seq, now_ms)?);
        }
        Ok(dispatches)
    }

    /// Leaf and arrival of the next query to start beneath `idx`, if any.
    fn next_promotion(
        &mut self,
        tree: &ResourceGroupTree,
        idx: NodeIndex,
    ) -> Result<Option<(NodeIndex, u64)>, SchedulerError> {
        let node = tree.node(idx)?;
        if node.pending.is_empty() || !node.can_run_more() {
            return Ok(None);
        }
        if node.leaf {
            return Ok(node.pending.next(node.spec.scheduling_policy).map(|seq| (idx, seq)));
        }

        let mut candidates = Vec::with_capacity(node.children.len());
        for &child in &node.children {
            let child_node = tree.node(child)?;
            if child_node.can_run_more() {
                if let Some(candidate) = tree.candidate(child)? {
                    candidates.push(candidate);
                }
            }
        }
        let policy = strategy(node.spec.scheduling_policy);
        while !candidates.is_empty() {
            let pick = policy.choose(&candidates, &mut self.rng).min(candidates.len() - 1);
            let chosen = candidates.remove(pick);
            if let Some(found) = self.next_promotion(tree, chosen.node)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
