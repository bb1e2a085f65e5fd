//! Frame Batch
//!
//! A frame batch is the coalesced set of dirty nodes for one scheduling tick.
//! Each tier has its own FIFO queue; membership is tracked separately so that
//! insertion is idempotent and removal or re-tiering is O(1). Queue entries
//! whose membership no longer matches are skipped lazily when popped.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::{NodeId, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    tier: Tier,
    /// Frame that started the propagation this mark belongs to.
    wave: u64,
}

/// Dirty nodes waiting for a flush, grouped by tier.
#[derive(Debug, Default, Clone)]
pub struct FrameBatch {
    queues: [VecDeque<NodeId>; 3],
    members: HashMap<NodeId, Entry>,
}

impl FrameBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `node`. Returns false if it was already queued.
    ///
    /// A repeated insert keeps the original position and wave.
    pub fn insert(&mut self, node: NodeId, tier: Tier, wave: u64) -> bool {
        if self.members.contains_key(&node) {
            return false;
        }
        self.members.insert(node, Entry { tier, wave });
        self.queues[tier.index()].push_back(node);
        true
    }

    /// Drop `node` from the batch. Returns its wave if it was queued.
    pub fn remove(&mut self, node: NodeId) -> Option<u64> {
        self.members.remove(&node).map(|entry| entry.wave)
    }

    /// Move a queued node to another tier's queue (at the back).
    pub fn retier(&mut self, node: NodeId, tier: Tier) -> bool {
        match self.members.get_mut(&node) {
            Some(entry) if entry.tier != tier => {
                entry.tier = tier;
                self.queues[tier.index()].push_back(node);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Pop the next node: highest tier first, FIFO within a tier.
    pub fn pop(&mut self) -> Option<(NodeId, u64)> {
        self.pop_entry().map(|(node, entry)| (node, entry.wave))
    }

    /// Queued nodes in evaluation order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut seen = HashSet::with_capacity(self.members.len());
        let mut order = Vec::with_capacity(self.members.len());
        for tier in Tier::ALL {
            for node in &self.queues[tier.index()] {
                let live = self
                    .members
                    .get(node)
                    .is_some_and(|entry| entry.tier == tier);
                if live && seen.insert(*node) {
                    order.push(*node);
                }
            }
        }
        order
    }

    /// Append `later` behind the entries of `self`.
    ///
    /// Used when a flush runs out of budget: the unfinished nodes keep their
    /// place ahead of the marks deferred during that flush.
    pub fn absorb(&mut self, mut later: FrameBatch) {
        while let Some((node, entry)) = later.pop_entry() {
            self.insert(node, entry.tier, entry.wave);
        }
    }

    fn pop_entry(&mut self) -> Option<(NodeId, Entry)> {
        for tier in Tier::ALL {
            while let Some(node) = self.queues[tier.index()].pop_front() {
                match self.members.get(&node) {
                    Some(entry) if entry.tier == tier => {
                        let entry = *entry;
                        self.members.remove(&node);
                        return Some((node, entry));
                    }
                    // removed or re-tiered since it was queued
                    _ => continue,
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_is_idempotent() {
        let mut batch = FrameBatch::new();
        let node = NodeId::new();

        assert!(batch.insert(node, Tier::Visible, 1));
        assert!(!batch.insert(node, Tier::Visible, 2));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.pop(), Some((node, 1)));
        assert_eq!(batch.pop(), None);
    }

    #[test]
    fn pops_by_tier_then_fifo() {
        let mut batch = FrameBatch::new();
        let bg = NodeId::new();
        let vis1 = NodeId::new();
        let off = NodeId::new();
        let vis2 = NodeId::new();

        batch.insert(bg, Tier::Background, 0);
        batch.insert(vis1, Tier::Visible, 0);
        batch.insert(off, Tier::OffScreen, 0);
        batch.insert(vis2, Tier::Visible, 0);

        assert_eq!(batch.nodes(), vec![vis1, vis2, off, bg]);
        let popped: Vec<_> = std::iter::from_fn(|| batch.pop().map(|(n, _)| n)).collect();
        assert_eq!(popped, vec![vis1, vis2, off, bg]);
    }

    #[test]
    fn removed_nodes_are_skipped() {
        let mut batch = FrameBatch::new();
        let a = NodeId::new();
        let b = NodeId::new();

        batch.insert(a, Tier::Visible, 0);
        batch.insert(b, Tier::Visible, 1);
        assert_eq!(batch.remove(a), Some(0));
        assert_eq!(batch.remove(a), None);

        assert_eq!(batch.pop(), Some((b, 1)));
        assert!(batch.is_empty());
    }

    #[test]
    fn retier_moves_node() {
        let mut batch = FrameBatch::new();
        let a = NodeId::new();
        let b = NodeId::new();

        batch.insert(a, Tier::Background, 0);
        batch.insert(b, Tier::OffScreen, 0);
        assert!(batch.retier(a, Tier::Visible));
        assert!(!batch.retier(a, Tier::Visible));

        assert_eq!(batch.nodes(), vec![a, b]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn absorb_keeps_earlier_entries_first() {
        let mut unfinished = FrameBatch::new();
        let mut deferred = FrameBatch::new();
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        unfinished.insert(a, Tier::OffScreen, 0);
        deferred.insert(b, Tier::OffScreen, 1);
        deferred.insert(a, Tier::OffScreen, 3);
        deferred.insert(c, Tier::Visible, 1);

        unfinished.absorb(deferred);
        assert_eq!(unfinished.nodes(), vec![c, a, b]);
        assert_eq!(unfinished.remove(a), Some(0));
    }
}
