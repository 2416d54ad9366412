//! Arena sum-tree
//!
//! Complete binary tree over a fixed-capacity ring of leaves, stored as a
//! flat array with parent/child index arithmetic. Each internal node holds
//! the sum of its children, which gives O(log capacity) weighted sampling
//! and priority updates. Capacity is fixed at construction; inserting past
//! it overwrites the oldest leaf.

use crate::error::{FxrlError, Result};

/// Sum-tree arena over `capacity` leaves.
///
/// Nodes occupy a single `Vec<f32>` of length `2 * capacity - 1`; leaves
/// live in the last `capacity` slots. Leaf `i` maps to tree index
/// `i + capacity - 1`.
#[derive(Debug, Clone)]
pub struct SumTree {
    nodes: Vec<f32>,
    capacity: usize,
    /// Next leaf slot to overwrite (ring cursor)
    cursor: usize,
    /// Leaves written so far, saturating at capacity
    n_entries: usize,
}

impl SumTree {
    /// Create an empty tree with the given leaf capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sum-tree capacity must be positive");
        Self {
            nodes: vec![0.0; 2 * capacity - 1],
            capacity,
            cursor: 0,
            n_entries: 0,
        }
    }

    /// Leaf capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of leaves written so far (saturates at capacity).
    pub fn len(&self) -> usize {
        self.n_entries
    }

    /// True when no leaf has been written yet.
    pub fn is_empty(&self) -> bool {
        self.n_entries == 0
    }

    /// Sum of all leaf priorities (the root value).
    pub fn total(&self) -> f32 {
        self.nodes[0]
    }

    /// Tree index of the leaf slot the next `add` will write.
    pub fn cursor_index(&self) -> usize {
        self.cursor + self.capacity - 1
    }

    /// Write `priority` at the ring cursor, returning the leaf slot
    /// (data index) that was written. Overwrites the oldest leaf once
    /// full.
    pub fn add(&mut self, priority: f32) -> Result<usize> {
        let slot = self.cursor;
        self.update(self.cursor_index(), priority)?;
        self.cursor = (self.cursor + 1) % self.capacity;
        self.n_entries = (self.n_entries + 1).min(self.capacity);
        Ok(slot)
    }

    /// Overwrite the priority at `tree_index` and re-derive every ancestor
    /// so the root stays the exact sum of the leaves.
    ///
    /// Negative priorities are rejected, not clamped.
    pub fn update(&mut self, tree_index: usize, priority: f32) -> Result<()> {
        if !(priority >= 0.0) {
            return Err(FxrlError::InvalidPriority(priority));
        }
        debug_assert!(
            tree_index >= self.capacity - 1 && tree_index < self.nodes.len(),
            "tree index {tree_index} is not a leaf"
        );
        self.nodes[tree_index] = priority;

        let mut node = tree_index;
        while node != 0 {
            node = (node - 1) / 2;
            let left = 2 * node + 1;
            let right = left + 1;
            // Recompute instead of adding the delta: keeps the invariant
            // exact under f32 rounding.
            self.nodes[node] = self.nodes[left] + self.nodes[right];
        }
        Ok(())
    }

    /// Descend from the root using cumulative-sum comparisons to find the
    /// leaf whose priority interval contains `value`.
    ///
    /// Returns `(tree_index, priority, data_index)`.
    pub fn retrieve(&self, value: f32) -> (usize, f32, usize) {
        let mut value = value;
        let mut node = 0usize;
        loop {
            let left = 2 * node + 1;
            if left >= self.nodes.len() {
                break;
            }
            if value <= self.nodes[left] {
                node = left;
            } else {
                value -= self.nodes[left];
                node = left + 1;
            }
        }
        (node, self.nodes[node], node - (self.capacity - 1))
    }

    /// Priority currently stored at a leaf's tree index.
    pub fn priority(&self, tree_index: usize) -> f32 {
        self.nodes[tree_index]
    }
}
