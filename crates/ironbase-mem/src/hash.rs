//! Chained hash index with external chains.
//!
//! The table maps a 64-bit *fold* to a payload value with separate
//! chaining. It is partitioned into a power-of-two number of stripes, each
//! with its own mutex and its own bounded node slab, so concurrent lookups
//! on different stripes never contend.
//!
//! Two properties matter to callers:
//!
//! - Insertion can fail. A stripe's slab has a fixed capacity, and when it
//!   is exhausted the insert is rejected rather than growing the table;
//!   the adaptive-index use case tolerates rejection.
//! - Deletion compacts the slab in place: the last node is moved into the
//!   freed slot and the one link that referenced it is retargeted. Chain
//!   iteration must therefore restart after a deletion.
//!
//! Duplicate folds are legal; a `(fold, data)` pair is unique, and the
//! data value disambiguates.

use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct HashNode<T> {
    fold: u64,
    data: T,
    next: Option<u32>,
}

#[derive(Debug)]
struct Stripe<T> {
    /// Chain heads, indexed by cell.
    cells: Vec<Option<u32>>,
    /// Node slab: the stripe's arena. Bounded by `max_nodes`.
    nodes: Vec<HashNode<T>>,
    max_nodes: usize,
}

/// Striped chained hash table mapping `fold -> T`.
#[derive(Debug)]
pub struct HashTable<T> {
    stripes: Vec<Mutex<Stripe<T>>>,
    stripe_mask: u64,
    cells_per_stripe: usize,
}

impl<T: Copy + PartialEq> HashTable<T> {
    /// Create a table with `n_cells` total cells split over `n_stripes`
    /// stripes, each stripe's slab capped at `max_nodes_per_stripe`.
    ///
    /// # Panics
    ///
    /// Panics if `n_stripes` is not a power of two or `n_cells` is not a
    /// multiple of `n_stripes`.
    #[must_use]
    pub fn new(n_cells: usize, n_stripes: usize, max_nodes_per_stripe: usize) -> Self {
        assert!(n_stripes.is_power_of_two(), "stripe count must be a power of two");
        assert!(n_cells >= n_stripes && n_cells % n_stripes == 0, "cells must split evenly over stripes");
        let cells_per_stripe = n_cells / n_stripes;
        let stripes = (0..n_stripes)
            .map(|_| {
                Mutex::new(Stripe {
                    cells: vec![None; cells_per_stripe],
                    nodes: Vec::new(),
                    max_nodes: max_nodes_per_stripe,
                })
            })
            .collect();
        Self { stripes, stripe_mask: (n_stripes - 1) as u64, cells_per_stripe }
    }

    #[inline]
    fn stripe_of(&self, fold: u64) -> usize {
        (fold & self.stripe_mask) as usize
    }

    #[inline]
    fn cell_of(&self, fold: u64) -> usize {
        ((fold >> self.stripe_mask.count_ones()) % self.cells_per_stripe as u64) as usize
    }

    /// Insert `(fold, data)`.
    ///
    /// If a node with the same fold exists its data is updated in place
    /// and no new node is created. Returns `false` when the stripe's slab
    /// is exhausted; the chain is left untouched in that case.
    pub fn insert(&self, fold: u64, data: T) -> bool {
        let cell = self.cell_of(fold);
        let mut stripe = self.stripes[self.stripe_of(fold)].lock();

        let mut cursor = stripe.cells[cell];
        let mut tail: Option<u32> = None;
        while let Some(idx) = cursor {
            let node = &mut stripe.nodes[idx as usize];
            if node.fold == fold {
                node.data = data;
                return true;
            }
            tail = Some(idx);
            cursor = node.next;
        }

        if stripe.nodes.len() >= stripe.max_nodes {
            warn!(fold, "hash stripe slab exhausted, insert rejected");
            return false;
        }
        let new_idx = u32::try_from(stripe.nodes.len()).expect("node index fits in u32");
        stripe.nodes.push(HashNode { fold, data, next: None });
        match tail {
            Some(t) => stripe.nodes[t as usize].next = Some(new_idx),
            None => stripe.cells[cell] = Some(new_idx),
        }
        true
    }

    /// First payload stored under `fold`, if any.
    #[must_use]
    pub fn search(&self, fold: u64) -> Option<T> {
        let cell = self.cell_of(fold);
        let stripe = self.stripes[self.stripe_of(fold)].lock();
        let mut cursor = stripe.cells[cell];
        while let Some(idx) = cursor {
            let node = &stripe.nodes[idx as usize];
            if node.fold == fold {
                return Some(node.data);
            }
            cursor = node.next;
        }
        None
    }

    /// Whether the exact `(fold, data)` pair is present.
    #[must_use]
    pub fn contains(&self, fold: u64, data: T) -> bool {
        let cell = self.cell_of(fold);
        let stripe = self.stripes[self.stripe_of(fold)].lock();
        Self::find_node(&stripe, cell, fold, data).is_some()
    }

    /// Update the payload of the `(fold, old)` node to `new`, if present.
    pub fn update(&self, fold: u64, old: T, new: T) -> bool {
        let cell = self.cell_of(fold);
        let mut stripe = self.stripes[self.stripe_of(fold)].lock();
        match Self::find_node(&stripe, cell, fold, old) {
            Some(idx) => {
                stripe.nodes[idx as usize].data = new;
                true
            }
            None => false,
        }
    }

    /// Delete the `(fold, data)` node. Returns whether it was present.
    pub fn delete(&self, fold: u64, data: T) -> bool {
        let cell = self.cell_of(fold);
        let mut stripe = self.stripes[self.stripe_of(fold)].lock();
        match Self::find_node(&stripe, cell, fold, data) {
            Some(idx) => {
                self.delete_node(&mut stripe, cell, idx);
                true
            }
            None => false,
        }
    }

    /// Remove every node under `fold` whose payload satisfies `pred`.
    ///
    /// Restarts from the chain head after each removal, because deletion
    /// compacts the slab and may move other nodes. Returns the number of
    /// nodes removed.
    pub fn remove_all_matching(&self, fold: u64, pred: impl Fn(&T) -> bool) -> usize {
        let cell = self.cell_of(fold);
        let mut stripe = self.stripes[self.stripe_of(fold)].lock();
        let mut removed = 0;
        'restart: loop {
            let mut cursor = stripe.cells[cell];
            while let Some(idx) = cursor {
                let node = &stripe.nodes[idx as usize];
                if node.fold == fold && pred(&node.data) {
                    self.delete_node(&mut stripe, cell, idx);
                    removed += 1;
                    continue 'restart;
                }
                cursor = node.next;
            }
            return removed;
        }
    }

    /// Total node count across all stripes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.lock().nodes.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every node is reachable from the cell its fold maps to.
    #[must_use]
    pub fn validate(&self) -> bool {
        for (stripe_idx, stripe) in self.stripes.iter().enumerate() {
            let stripe = stripe.lock();
            let mut reached = vec![false; stripe.nodes.len()];
            for (cell, head) in stripe.cells.iter().enumerate() {
                let mut cursor = *head;
                while let Some(idx) = cursor {
                    let node = &stripe.nodes[idx as usize];
                    if self.stripe_of(node.fold) != stripe_idx || self.cell_of(node.fold) != cell {
                        return false;
                    }
                    if reached[idx as usize] {
                        // Cycle.
                        return false;
                    }
                    reached[idx as usize] = true;
                    cursor = node.next;
                }
            }
            if !reached.into_iter().all(|r| r) {
                return false;
            }
        }
        true
    }

    fn find_node(stripe: &Stripe<T>, cell: usize, fold: u64, data: T) -> Option<u32> {
        let mut cursor = stripe.cells[cell];
        while let Some(idx) = cursor {
            let node = &stripe.nodes[idx as usize];
            if node.fold == fold && node.data == data {
                return Some(idx);
            }
            cursor = node.next;
        }
        None
    }

    /// Unlink `idx` from its chain and compact the slab by moving the last
    /// node into the hole.
    fn delete_node(&self, stripe: &mut Stripe<T>, cell: usize, idx: u32) {
        // Unlink.
        let next = stripe.nodes[idx as usize].next;
        if stripe.cells[cell] == Some(idx) {
            stripe.cells[cell] = next;
        } else {
            let mut cursor = stripe.cells[cell];
            while let Some(i) = cursor {
                if stripe.nodes[i as usize].next == Some(idx) {
                    stripe.nodes[i as usize].next = next;
                    break;
                }
                cursor = stripe.nodes[i as usize].next;
            }
        }

        // Compact: retarget the single link that points at the last node,
        // then move it into the freed slot.
        let last = u32::try_from(stripe.nodes.len() - 1).expect("node index fits in u32");
        if idx != last {
            let moved_cell = self.cell_of(stripe.nodes[last as usize].fold);
            if stripe.cells[moved_cell] == Some(last) {
                stripe.cells[moved_cell] = Some(idx);
            } else {
                let mut cursor = stripe.cells[moved_cell];
                while let Some(i) = cursor {
                    if stripe.nodes[i as usize].next == Some(last) {
                        stripe.nodes[i as usize].next = Some(idx);
                        break;
                    }
                    cursor = stripe.nodes[i as usize].next;
                }
            }
        }
        stripe.nodes.swap_remove(idx as usize);
    }
}
