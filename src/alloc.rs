//! Block allocator for the double array.
//!
//! Slots are grouped in blocks of 256. Each block keeps a circular free list
//! threaded through its unused slots and sits in one of three circular block
//! lists:
//!
//! * Open: two or more free slots, still worth searching.
//! * Closed: one free slot, or too many failed placements.
//! * Full: no free slots.
//!
//! Block 0 holds the root and belongs to no list; every transfer skips it.

use tracing::{debug, trace};

use crate::buffer::{Block, Blocks, NodeLinks, Nodes, Record, Rejects, REJECT_LEN};
use crate::encoding::Encoding;
use crate::options::Growth;

pub(crate) const BLOCK_SIZE: usize = 256;

/// Index space of node slots.
const MAX_CAPACITY: usize = i32::MAX as usize + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockList {
    Open,
    Closed,
    Full,
}

#[derive(Clone)]
pub(crate) struct Allocator {
    pub(crate) nodes: Nodes,
    pub(crate) links: NodeLinks,
    pub(crate) blocks: Blocks,
    pub(crate) reject: Rejects,
    pub(crate) head_full: i32,
    pub(crate) head_closed: i32,
    pub(crate) head_open: i32,
    pub(crate) max_trial: i32,
    /// Slots allocated in `nodes`.
    pub(crate) capacity: usize,
    /// Slots handed out as blocks, a multiple of 256.
    pub(crate) size: usize,
    pub(crate) growth: Growth,
}

impl Allocator {
    /// One block: the root at slot 0 plus a free list over slots 1..=255.
    pub(crate) fn new(root_base: i32, max_trial: i32, growth: Growth) -> Self {
        let mut nodes = Nodes::new(BLOCK_SIZE);
        nodes.set_node(0, root_base, -1);
        nodes.set_node(1, -255, -2);
        for i in 2..255 {
            nodes.set_node(i, -(i - 1), -(i + 1));
        }
        nodes.set_node(255, -254, -1);

        let mut blocks = Blocks::new(1);
        blocks.set_num(0, 255);
        blocks.set_head(0, 1);

        Self {
            nodes,
            links: NodeLinks::new(BLOCK_SIZE),
            blocks,
            reject: Rejects::new(REJECT_LEN),
            head_full: 0,
            head_closed: 0,
            head_open: 0,
            max_trial,
            capacity: BLOCK_SIZE,
            size: BLOCK_SIZE,
            growth,
        }
    }

    pub(crate) fn head(&self, list: BlockList) -> i32 {
        match list {
            BlockList::Open => self.head_open,
            BlockList::Closed => self.head_closed,
            BlockList::Full => self.head_full,
        }
    }

    fn head_mut(&mut self, list: BlockList) -> &mut i32 {
        match list {
            BlockList::Open => &mut self.head_open,
            BlockList::Closed => &mut self.head_closed,
            BlockList::Full => &mut self.head_full,
        }
    }

    /// Free slots across all allocated blocks.
    pub(crate) fn free_slots(&self) -> usize {
        (0..(self.size / BLOCK_SIZE) as i32)
            .map(|i| self.blocks.num(i) as usize)
            .sum()
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity + self.growth.step(self.capacity);
        assert!(
            new_capacity <= MAX_CAPACITY,
            "double array exceeds the i32 slot index space"
        );
        debug!(from = self.capacity, to = new_capacity, "cedar.grow");
        self.nodes.resize(new_capacity);
        self.links.resize(new_capacity);
        self.blocks.resize(new_capacity / BLOCK_SIZE);
        self.capacity = new_capacity;
    }

    /// Appends a block with a fresh free list and makes it the Open head.
    /// Returns the block index.
    pub(crate) fn add_block(&mut self) -> i32 {
        if self.size == self.capacity {
            self.grow();
        }
        let size = self.size as i32;
        let idx = size >> 8;

        self.blocks.set(idx as usize, Block::initial(idx as usize));
        self.blocks.set_head(idx, size);
        self.nodes.set_node(size, -(size + 255), -(size + 1));
        for i in size + 1..size + 255 {
            self.nodes.set_node(i, -(i - 1), -(i + 1));
        }
        self.nodes.set_node(size + 255, -(size + 254), -size);

        let empty = self.head_open == 0;
        self.push_block(idx, BlockList::Open, empty);
        self.size += BLOCK_SIZE;
        trace!(block = idx, "cedar.add_block");
        idx
    }

    fn pop_block(&mut self, idx: i32, from: BlockList, last: bool) {
        if last {
            *self.head_mut(from) = 0;
            return;
        }
        let prev = self.blocks.prev(idx);
        let next = self.blocks.next(idx);
        self.blocks.set_next(prev, next);
        self.blocks.set_prev(next, prev);
        if idx == self.head(from) {
            *self.head_mut(from) = next;
        }
    }

    /// Links `idx` in before the current head and makes it the new head.
    fn push_block(&mut self, idx: i32, to: BlockList, empty: bool) {
        if empty {
            self.blocks.set_prev(idx, idx);
            self.blocks.set_next(idx, idx);
        } else {
            let head = self.head(to);
            let tail = self.blocks.prev(head);
            self.blocks.set_prev(idx, tail);
            self.blocks.set_next(idx, head);
            self.blocks.set_next(tail, idx);
            self.blocks.set_prev(head, idx);
        }
        *self.head_mut(to) = idx;
    }

    pub(crate) fn transfer_block(&mut self, idx: i32, from: BlockList, to: BlockList) {
        debug_assert_ne!(idx, 0, "block 0 never joins a list");
        let last = idx == self.blocks.next(idx);
        let empty = self.head(to) == 0;
        self.pop_block(idx, from, last);
        self.push_block(idx, to, empty);
    }

    /// A free slot for a single child.
    pub(crate) fn find_place(&mut self) -> i32 {
        if self.head_closed != 0 {
            return self.blocks.head(self.head_closed);
        }
        if self.head_open != 0 {
            return self.blocks.head(self.head_open);
        }
        self.add_block() << 8
    }

    /// A slot `e` such that `e ^ children[0] ^ c` is free for every label
    /// `c` in `children`. Returns `e`, the slot for `children[0]`.
    ///
    /// Every Open block visited without success learns a tighter reject bound
    /// and one more failed trial; blocks reaching `max_trial` move to Closed.
    pub(crate) fn find_places(&mut self, children: &[u8]) -> i32 {
        debug_assert!(children.len() > 1);
        let nc = children.len() as i16;
        let mut idx = self.head_open;
        if idx != 0 {
            let last = self.blocks.prev(self.head_open);
            loop {
                if self.blocks.num(idx) >= nc && nc < self.blocks.reject(idx) {
                    if let Some(e) = self.scan_block(idx, children) {
                        self.blocks.set_head(idx, e);
                        return e;
                    }
                }

                self.blocks.set_reject(idx, nc);
                let num = self.blocks.num(idx) as usize;
                if nc < self.reject.bound(num) {
                    self.reject.set_bound(num, nc);
                }

                let next = self.blocks.next(idx);
                let trial = self.blocks.trial(idx) + 1;
                self.blocks.set_trial(idx, trial);
                if trial == self.max_trial {
                    self.transfer_block(idx, BlockList::Open, BlockList::Closed);
                }
                if idx == last {
                    break;
                }
                idx = next;
            }
            trace!(children = nc, "cedar.find_places.exhausted");
        }
        self.add_block() << 8
    }

    /// Walks the free list of `idx` for a slot fitting every label.
    fn scan_block(&self, idx: i32, children: &[u8]) -> Option<i32> {
        let head = self.blocks.head(idx);
        let mut e = head;
        loop {
            let base = e ^ children[0] as i32;
            if children[1..]
                .iter()
                .all(|&c| self.nodes.check(base ^ c as i32) < 0)
            {
                return Some(e);
            }
            e = -self.nodes.check(e);
            if e == head {
                return None;
            }
        }
    }

    /// Claims the slot for child `label` of `from`. When `base` is negative
    /// (`from` has no children yet) a slot is found and `from`'s base is
    /// pointed at it. The slot is initialized with `check = from` and the
    /// encoding's fresh base.
    pub(crate) fn pop_e_node<E: Encoding>(&mut self, base: i32, label: u8, from: i32) -> i32 {
        let e = if base < 0 {
            self.find_place()
        } else {
            base ^ label as i32
        };
        let idx = e >> 8;
        let prev = -self.nodes.base(e);
        let next = -self.nodes.check(e);

        let num = self.blocks.num(idx) - 1;
        self.blocks.set_num(idx, num);
        if num == 0 {
            if idx != 0 {
                self.transfer_block(idx, BlockList::Closed, BlockList::Full);
            }
        } else {
            self.nodes.set_check(prev, -next);
            self.nodes.set_base(next, -prev);
            if e == self.blocks.head(idx) {
                self.blocks.set_head(idx, next);
            }
            if idx != 0 && num == 1 && self.blocks.trial(idx) != self.max_trial {
                self.transfer_block(idx, BlockList::Open, BlockList::Closed);
            }
        }

        self.nodes.set_node(e, E::fresh(label), from);
        if base < 0 {
            self.nodes.set_base(from, E::encode_base(e ^ label as i32));
        }
        e
    }

    /// Returns slot `e` to its block's free list.
    pub(crate) fn push_e_node(&mut self, e: i32) {
        let idx = e >> 8;
        let num = self.blocks.num(idx) + 1;
        self.blocks.set_num(idx, num);
        if num == 1 {
            self.blocks.set_head(idx, e);
            self.nodes.set_node(e, -e, -e);
            if idx != 0 {
                self.transfer_block(idx, BlockList::Full, BlockList::Closed);
            }
        } else {
            let prev = self.blocks.head(idx);
            let next = -self.nodes.check(prev);
            self.nodes.set_node(e, -prev, -next);
            self.nodes.set_check(prev, -e);
            self.nodes.set_base(next, -e);
            if idx != 0 && (num == 2 || self.blocks.trial(idx) == self.max_trial) {
                self.transfer_block(idx, BlockList::Closed, BlockList::Open);
            }
            self.blocks.set_trial(idx, 0);
        }
        let bound = self.reject.bound(num as usize);
        if self.blocks.reject(idx) < bound {
            self.blocks.set_reject(idx, bound);
        }
        self.links.clear(e);
    }

    /// Blocks of `list` in ring order, starting at the head.
    #[cfg(test)]
    pub(crate) fn list_members(&self, list: BlockList) -> Vec<i32> {
        let head = self.head(list);
        let mut out = Vec::new();
        if head == 0 {
            return out;
        }
        let mut idx = head;
        loop {
            out.push(idx);
            idx = self.blocks.next(idx);
            if idx == head || out.len() > self.blocks.len() {
                return out;
            }
        }
    }

    /// Panics if list membership, ring links or per-block free lists are
    /// inconsistent with the block counters.
    #[cfg(test)]
    pub(crate) fn verify(&self) {
        let block_count = self.size / BLOCK_SIZE;
        let mut seen = vec![None; block_count];

        for list in [BlockList::Open, BlockList::Closed, BlockList::Full] {
            let members = self.list_members(list);
            assert!(members.len() <= block_count, "{list:?} list does not close");
            for &idx in &members {
                assert!(idx > 0 && (idx as usize) < block_count, "{list:?} holds block {idx}");
                assert_eq!(
                    self.blocks.prev(self.blocks.next(idx)),
                    idx,
                    "ring links broken at block {idx}"
                );
                assert!(seen[idx as usize].is_none(), "block {idx} in two lists");
                seen[idx as usize] = Some(list);

                let num = self.blocks.num(idx);
                match list {
                    BlockList::Full => assert_eq!(num, 0, "full block {idx}"),
                    BlockList::Closed => assert!(num >= 1, "closed block {idx}"),
                    BlockList::Open => assert!(num >= 2, "open block {idx} has {num} free"),
                }
            }
        }
        for idx in 1..block_count {
            assert!(seen[idx].is_some(), "block {idx} in no list");
        }

        for idx in 0..block_count as i32 {
            let num = self.blocks.num(idx) as usize;
            if num == 0 {
                continue;
            }
            let head = self.blocks.head(idx);
            let mut e = head;
            let mut count = 0;
            loop {
                assert_eq!(e >> 8, idx, "slot {e} on free list of block {idx}");
                assert!(self.nodes.check(e) < 0, "free slot {e} looks used");
                let next = -self.nodes.check(e);
                assert_eq!(-self.nodes.base(next), e, "free list back link at {next}");
                count += 1;
                assert!(count <= num, "free list of block {idx} longer than {num}");
                e = next;
                if e == head {
                    break;
                }
            }
            assert_eq!(count, num, "free list length of block {idx}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Standard;

    fn allocator() -> Allocator {
        Allocator::new(0, 1, Growth::Doubling)
    }

    #[test]
    fn test_initial_state() {
        let a = allocator();
        assert_eq!(a.capacity, 256);
        assert_eq!(a.size, 256);
        assert_eq!(a.free_slots(), 255);
        assert_eq!((a.head_open, a.head_closed, a.head_full), (0, 0, 0));
        assert_eq!(a.nodes.check(0), -1);
        a.verify();
    }

    #[test]
    fn test_add_block_grows_and_opens() {
        let mut a = allocator();
        assert_eq!(a.add_block(), 1);
        assert_eq!(a.capacity, 512);
        assert_eq!(a.head_open, 1);
        assert_eq!(a.add_block(), 2);
        assert_eq!(a.capacity, 1024);
        assert_eq!(a.head_open, 2);
        assert_eq!(a.list_members(BlockList::Open), vec![2, 1]);
        assert_eq!(a.add_block(), 3);
        assert_eq!(a.capacity, 1024);
        assert_eq!(a.free_slots(), 255 + 3 * 256);
        a.verify();
    }

    #[test]
    fn test_linear_growth() {
        let mut a = Allocator::new(0, 1, Growth::Linear { blocks: 1 });
        for expected in 2..6 {
            a.add_block();
            assert_eq!(a.capacity, expected * 256);
        }
        a.verify();
    }

    #[test]
    fn test_block_transitions_follow_free_count() {
        let mut a = allocator();
        let idx = a.add_block();
        let start = idx << 8;

        let mut taken = Vec::new();
        for i in 0..254 {
            taken.push(a.pop_e_node::<Standard>(start, i as u8, 0));
        }
        assert_eq!(a.blocks.num(idx), 2);
        assert_eq!(a.list_members(BlockList::Open), vec![idx]);

        taken.push(a.pop_e_node::<Standard>(start, 254, 0));
        assert_eq!(a.blocks.num(idx), 1);
        assert_eq!(a.list_members(BlockList::Closed), vec![idx]);
        a.verify();

        taken.push(a.pop_e_node::<Standard>(start, 255, 0));
        assert_eq!(a.blocks.num(idx), 0);
        assert_eq!(a.list_members(BlockList::Full), vec![idx]);
        a.verify();

        a.push_e_node(taken.pop().unwrap());
        assert_eq!(a.list_members(BlockList::Closed), vec![idx]);
        a.push_e_node(taken.pop().unwrap());
        assert_eq!(a.list_members(BlockList::Open), vec![idx]);
        a.verify();

        for e in taken {
            a.push_e_node(e);
        }
        assert_eq!(a.blocks.num(idx), 256);
        assert_eq!(a.free_slots(), 255 + 256);
        a.verify();
    }

    #[test]
    fn test_pop_e_node_points_childless_parent() {
        let mut a = allocator();
        let a_node = a.pop_e_node::<Standard>(0, b'a', 0);
        assert_eq!(a_node, b'a' as i32);
        assert_eq!(a.nodes.check(a_node), 0);
        assert_eq!(a.nodes.base(a_node), -1);
        assert_eq!(a.blocks.num(0), 254);

        // Block 0 is never offered by find_place, so a new block is opened.
        let b_node = a.pop_e_node::<Standard>(-1, b'b', a_node);
        assert_eq!(b_node, 256);
        assert_eq!(a.nodes.base(a_node), 256 ^ b'b' as i32);
        assert_eq!(a.nodes.check(b_node), a_node);
        assert_eq!(a.blocks.num(1), 255);
        a.verify();
    }

    #[test]
    fn test_find_places_demotes_failed_blocks() {
        let mut a = allocator();
        let idx = a.add_block();
        let start = idx << 8;
        // Leave only slots 0 and 1 of the block free: labels {0, 2} cannot fit.
        for i in 2..256 {
            a.pop_e_node::<Standard>(start, i as u8, 0);
        }
        assert_eq!(a.list_members(BlockList::Open), vec![idx]);

        let e = a.find_places(&[0, 2]);
        assert_eq!(e >> 8, idx + 1);
        assert_eq!(a.blocks.reject(idx), 2);
        assert_eq!(a.blocks.trial(idx), 1);
        assert_eq!(a.list_members(BlockList::Closed), vec![idx]);
        a.verify();
    }

    #[test]
    fn test_find_places_fits_children() {
        let mut a = allocator();
        let e = a.find_places(&[b'a', b'b', b'z']);
        let base = e ^ b'a' as i32;
        for c in [b'a', b'b', b'z'] {
            assert!(a.nodes.check(base ^ c as i32) < 0);
        }
    }
}
