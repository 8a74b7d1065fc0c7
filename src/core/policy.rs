//! Sibling selection strategies, one per scheduling policy.
//!
//! An internal node asks its strategy which eligible child should receive the
//! next slot. Strategies only see a [`Candidate`] summary of each child, so
//! they stay independent of the tree layout.

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::SchedulingPolicy;
use crate::core::group::NodeIndex;
use crate::util::serde::Priority;

/// Service charged per grant at weight 1. Divisible by every weight up to 16
/// so small weight ratios stay exact.
pub(crate) const SERVICE_SCALE: u64 = 720_720_000;

/// Summary of an eligible child.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub node: NodeIndex,
    pub weight: u32,
    pub oldest_arrival: u64,
    pub top_priority: Priority,
    pub top_arrival: u64,
    pub service_debt: u64,
    pub created_seq: u64,
}

pub(crate) trait SchedulingStrategy: Sync {
    /// Index into `candidates` of the child to serve. `candidates` is never empty.
    fn choose(&self, candidates: &[Candidate], rng: &mut StdRng) -> usize;

    /// A child of a node using this strategy received a slot.
    fn on_granted(&self, virtual_time: &mut u64, child_debt: &mut u64, weight: u32) {
        let _ = (virtual_time, child_debt, weight);
    }

    /// A child of a node using this strategy went from idle to having work.
    fn on_activated(&self, virtual_time: u64, child_debt: &mut u64) {
        let _ = (virtual_time, child_debt);
    }
}

/// Oldest waiting query anywhere beneath the child wins.
struct Fifo;

/// Random choice proportional to weight.
struct Weighted;

/// Least service received per unit of weight wins.
struct WeightedFair;

/// Highest waiting priority wins, then earliest arrival.
struct QueryPriority;

fn position_min_by_key<K: Ord>(candidates: &[Candidate], key: impl Fn(&Candidate) -> K) -> usize {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| key(c))
        .map_or(0, |(idx, _)| idx)
}

impl SchedulingStrategy for Fifo {
    fn choose(&self, candidates: &[Candidate], _rng: &mut StdRng) -> usize {
        position_min_by_key(candidates, |c| (c.oldest_arrival, c.created_seq))
    }
}

impl SchedulingStrategy for Weighted {
    fn choose(&self, candidates: &[Candidate], rng: &mut StdRng) -> usize {
        let total: u64 = candidates.iter().map(|c| u64::from(c.weight)).sum();
        if total == 0 {
            return 0;
        }
        let mut ticket = rng.random_range(0..total);
        for (idx, candidate) in candidates.iter().enumerate() {
            let weight = u64::from(candidate.weight);
            if ticket < weight {
                return idx;
            }
            ticket -= weight;
        }
        candidates.len() - 1
    }
}

impl SchedulingStrategy for WeightedFair {
    fn choose(&self, candidates: &[Candidate], _rng: &mut StdRng) -> usize {
        position_min_by_key(candidates, |c| (c.service_debt, c.created_seq))
    }

    fn on_granted(&self, virtual_time: &mut u64, child_debt: &mut u64, weight: u32) {
        *virtual_time = (*virtual_time).max(*child_debt);
        *child_debt = child_debt.saturating_add(SERVICE_SCALE / u64::from(weight.max(1)));
    }

    fn on_activated(&self, virtual_time: u64, child_debt: &mut u64) {
        // A returning child may not bank service it missed while idle.
        *child_debt = (*child_debt).max(virtual_time);
    }
}

impl SchedulingStrategy for QueryPriority {
    fn choose(&self, candidates: &[Candidate], _rng: &mut StdRng) -> usize {
        position_min_by_key(candidates, |c| {
            (std::cmp::Reverse(c.top_priority), c.top_arrival, c.created_seq)
        })
    }
}

/// Strategy used by a node configured with `policy`.
pub(crate) fn strategy(policy: SchedulingPolicy) -> &'static dyn SchedulingStrategy {
    match policy {
        SchedulingPolicy::Fifo => &Fifo,
        SchedulingPolicy::Weighted => &Weighted,
        SchedulingPolicy::WeightedFair => &WeightedFair,
        SchedulingPolicy::QueryPriority => &QueryPriority,
    }
}
