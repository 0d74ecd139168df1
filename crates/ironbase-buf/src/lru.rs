//! Young/old LRU list.
//!
//! One doubly linked list with a boundary pointer: the *young* sublist at
//! the head holds the working set, the *old* sublist at the tail holds
//! pages seen once. A page enters at the head of the old sublist; the
//! pool promotes it to young only when re-accessed after the configured
//! age threshold. Eviction scans from the tail.
//!
//! Nodes live in a slab indexed by `u32`, with a page-id map for O(1)
//! relocation.

use std::collections::HashMap;

use ironbase_types::PageId;

use crate::config::{OLD_RATIO_DIV, OLD_RATIO_MIN};

/// Slack around the old-sublist target before the boundary moves. A page
/// inserted a moment ago must not be flipped young by the rebalance that
/// its own insertion triggers.
const OLD_TOLERANCE: usize = 2;

#[derive(Debug)]
struct LruNode {
    page: PageId,
    prev: Option<u32>,
    next: Option<u32>,
    old: bool,
}

#[derive(Debug)]
pub(crate) struct LruList {
    nodes: Vec<LruNode>,
    free: Vec<u32>,
    index: HashMap<PageId, u32>,
    head: Option<u32>,
    tail: Option<u32>,
    /// First node of the old sublist.
    lru_old: Option<u32>,
    n_old: usize,
    old_ratio: u16,
}

impl LruList {
    pub fn new(old_ratio: u16) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            lru_old: None,
            n_old: 0,
            old_ratio: old_ratio.clamp(OLD_RATIO_MIN, OLD_RATIO_DIV),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Update the old-sublist ratio, readjusting the boundary. Returns the
    /// clamped value actually applied.
    pub fn set_old_ratio(&mut self, ratio: u16) -> u16 {
        self.old_ratio = ratio.clamp(OLD_RATIO_MIN, OLD_RATIO_DIV);
        self.adjust();
        self.old_ratio
    }

    /// Whether `page` currently sits in the old sublist.
    pub fn is_old(&self, page: PageId) -> Option<bool> {
        self.index.get(&page).map(|&i| self.nodes[i as usize].old)
    }

    fn alloc_node(&mut self, page: PageId) -> u32 {
        let node = LruNode { page, prev: None, next: None, old: false };
        match self.free.pop() {
            Some(i) => {
                self.nodes[i as usize] = node;
                i
            }
            None => {
                let i = u32::try_from(self.nodes.len()).expect("lru slab index fits in u32");
                self.nodes.push(node);
                i
            }
        }
    }

    fn unlink(&mut self, i: u32) {
        let (prev, next, old) = {
            let n = &self.nodes[i as usize];
            (n.prev, n.next, n.old)
        };
        match prev {
            Some(p) => self.nodes[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(x) => self.nodes[x as usize].prev = prev,
            None => self.tail = prev,
        }
        if old {
            self.n_old -= 1;
        }
        if self.lru_old == Some(i) {
            self.lru_old = next;
        }
        self.nodes[i as usize].prev = None;
        self.nodes[i as usize].next = None;
    }

    fn link_at_head(&mut self, i: u32, old: bool) {
        self.nodes[i as usize].prev = None;
        self.nodes[i as usize].next = self.head;
        self.nodes[i as usize].old = old;
        if let Some(h) = self.head {
            self.nodes[h as usize].prev = Some(i);
        }
        self.head = Some(i);
        if self.tail.is_none() {
            self.tail = Some(i);
        }
        if old {
            self.n_old += 1;
        }
    }

    /// Add a page at the head of the old sublist.
    ///
    /// The node lands just behind the boundary, on the old side, so a
    /// subsequent boundary shift trims longer-resident pages first and
    /// never flips the page that was inserted a moment ago.
    pub fn add_to_old(&mut self, page: PageId) {
        assert!(!self.index.contains_key(&page), "page {page} already on LRU list");
        let i = self.alloc_node(page);
        match self.lru_old {
            Some(boundary) => {
                let next = self.nodes[boundary as usize].next;
                self.nodes[i as usize].prev = Some(boundary);
                self.nodes[i as usize].next = next;
                self.nodes[i as usize].old = true;
                self.nodes[boundary as usize].next = Some(i);
                match next {
                    Some(x) => self.nodes[x as usize].prev = Some(i),
                    None => self.tail = Some(i),
                }
                self.n_old += 1;
            }
            None => {
                // Empty list, or everything young: start the old sublist
                // at the tail.
                match self.tail {
                    Some(_) => {
                        // Append at the tail as the first old node.
                        let t = self.tail.expect("non-empty list has a tail");
                        self.nodes[i as usize].prev = Some(t);
                        self.nodes[i as usize].next = None;
                        self.nodes[i as usize].old = true;
                        self.nodes[t as usize].next = Some(i);
                        self.tail = Some(i);
                        self.n_old += 1;
                    }
                    None => {
                        self.link_at_head(i, true);
                    }
                }
                self.lru_old = Some(i);
            }
        }
        self.index.insert(page, i);
        self.adjust();
    }

    /// Move a page to the head of the young sublist.
    pub fn make_young(&mut self, page: PageId) {
        let i = *self.index.get(&page).expect("make_young of absent page");
        self.unlink(i);
        self.link_at_head(i, false);
        self.adjust();
    }

    /// Move a page to the tail, marking it old (eviction candidate).
    pub fn make_old(&mut self, page: PageId) {
        let i = *self.index.get(&page).expect("make_old of absent page");
        self.unlink(i);
        match self.tail {
            Some(t) => {
                self.nodes[i as usize].prev = Some(t);
                self.nodes[i as usize].next = None;
                self.nodes[i as usize].old = true;
                self.nodes[t as usize].next = Some(i);
                self.tail = Some(i);
                self.n_old += 1;
            }
            None => self.link_at_head(i, true),
        }
        if self.lru_old.is_none() {
            self.lru_old = Some(i);
        }
        self.adjust();
    }

    /// Remove a page from the list.
    pub fn remove(&mut self, page: PageId) {
        let i = self.index.remove(&page).expect("remove of absent page");
        self.unlink(i);
        self.free.push(i);
        self.adjust();
    }

    /// Pages from the tail toward the head, the eviction scan order.
    pub fn pages_from_tail(&self) -> Vec<PageId> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.tail;
        while let Some(i) = cursor {
            out.push(self.nodes[i as usize].page);
            cursor = self.nodes[i as usize].prev;
        }
        out
    }

    fn target_old(&self) -> usize {
        let len = self.len();
        if len < 2 {
            return len;
        }
        (len * self.old_ratio as usize / OLD_RATIO_DIV as usize).max(1)
    }

    /// Move the old boundary while the old sublist length sits outside
    /// the tolerance band around the ratio target.
    fn adjust(&mut self) {
        let target = self.target_old();
        // Shrink: the first old node becomes young.
        while self.n_old > target + OLD_TOLERANCE {
            let b = self.lru_old.expect("old nodes imply a boundary");
            self.nodes[b as usize].old = false;
            self.n_old -= 1;
            self.lru_old = self.nodes[b as usize].next;
        }
        // Grow: the last young node becomes old.
        while self.n_old + OLD_TOLERANCE < target {
            let b = match self.lru_old {
                Some(b) => self.nodes[b as usize].prev.expect("n_old < target implies young nodes"),
                None => self.tail.expect("target > 0 implies non-empty list"),
            };
            self.nodes[b as usize].old = true;
            self.n_old += 1;
            self.lru_old = Some(b);
        }
    }

    #[cfg(test)]
    fn check(&self) {
        let mut seen = 0;
        let mut cursor = self.head;
        let mut in_old = false;
        let mut n_old = 0;
        let mut prev: Option<u32> = None;
        while let Some(i) = cursor {
            let n = &self.nodes[i as usize];
            assert_eq!(n.prev, prev);
            if n.old {
                if !in_old {
                    assert_eq!(self.lru_old, Some(i), "boundary must be the first old node");
                    in_old = true;
                }
                n_old += 1;
            } else {
                assert!(!in_old, "young node after the old boundary");
            }
            seen += 1;
            prev = cursor;
            cursor = n.next;
        }
        assert_eq!(self.tail, prev);
        assert_eq!(seen, self.len());
        assert_eq!(n_old, self.n_old);
        if self.len() >= 2 {
            let target = self.target_old();
            assert!(
                self.n_old <= target + OLD_TOLERANCE && self.n_old + OLD_TOLERANCE >= target,
                "old length {} strayed from target {target}",
                self.n_old
            );
        }
    }
}
