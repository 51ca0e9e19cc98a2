use std::collections::VecDeque;

/// Access order of the ways of one cache set.
///
/// Ways that were never used, or that lost their block, sit at the
/// least-recently-used end, so the eviction candidate is an empty way
/// whenever the set has one.
#[derive(Clone, Debug)]
pub struct RecencyTracker {
    // least recently used first
    order: VecDeque<usize>,
}

impl RecencyTracker {
    pub fn new(assoc: usize) -> Self {
        RecencyTracker {
            order: (0..assoc).collect(),
        }
    }

    pub fn ways(&self) -> usize {
        self.order.len()
    }

    /// marks `way` as most recently used
    pub fn touch(&mut self, way: usize) {
        self.unlink(way);
        self.order.push_back(way);
    }

    /// marks `way` as the next to evict
    pub fn demote(&mut self, way: usize) {
        self.unlink(way);
        self.order.push_front(way);
    }

    pub fn victim(&self) -> usize {
        self.order[0]
    }

    /// ways from least to most recently used
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }

    fn unlink(&mut self, way: usize) {
        let pos = self.order
            .iter()
            .position(|&w| w == way)
            .unwrap_or_else(|| panic!("way {} out of range for a {}-way set", way, self.order.len()));
        self.order.remove(pos);
    }
}
