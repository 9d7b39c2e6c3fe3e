//! Trie algorithms over the double array: lookup, insertion with conflict
//! resolution, deletion and sibling-chain maintenance.

use std::fmt;
use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::alloc::Allocator;
use crate::encoding::{Encoding, Reduced, Standard, VALUE_LIMIT};
use crate::error::{CedarError, Result};
use crate::iter::{Iter, Keys, PredictIter, PrefixIter, ScanIter, Values};
use crate::options::Options;

/// Outcome of a key lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// The key is stored with this value.
    Found(i32),
    /// The key is a path in the trie but no value is stored for it.
    NoValue,
    /// The key leaves the trie.
    Absent,
}

impl Lookup {
    pub fn found(self) -> Option<i32> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

/// A stored key reached by a prefix or predictive search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Match {
    pub value: i32,
    /// Key length in bytes. For predictive searches this counts only the
    /// bytes after the queried prefix.
    pub length: usize,
    /// Node ending the key, usable with [`Cedar::suffix`].
    pub node: i32,
}

/// A stored key found inside a scanned text, at `text[start..end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextMatch {
    pub start: usize,
    pub end: usize,
    pub value: i32,
}

/// Byte sizes of the four buffers backing a trie.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub nodes: usize,
    pub links: usize,
    pub blocks: usize,
    pub reject: usize,
}

impl Allocation {
    pub fn total(&self) -> usize {
        self.nodes + self.links + self.blocks + self.reject
    }
}

/// Double-array trie mapping byte strings to `i32` values.
///
/// Keys must be non-empty and free of NUL bytes. The encoding parameter picks
/// the node layout; see [`Standard`] and [`Reduced`].
///
/// ```
/// use cedar_rs::{Cedar, Lookup};
///
/// let mut trie: Cedar = Cedar::new();
/// trie.update(b"apple", 1).unwrap();
/// trie.update(b"app", 2).unwrap();
/// assert_eq!(trie.find(b"apple"), Lookup::Found(1));
/// assert_eq!(trie.find(b"ap"), Lookup::NoValue);
/// assert_eq!(trie.find(b"banana"), Lookup::Absent);
/// ```
pub struct Cedar<E: Encoding = Standard> {
    pub(crate) alloc: Allocator,
    pub(crate) ordered: bool,
    _encoding: PhantomData<E>,
}

/// A trie using the [`Reduced`] encoding.
pub type ReducedCedar = Cedar<Reduced>;

/// Position of an enumeration: the node ending a key, its depth below the
/// enumeration root, and the stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cursor {
    pub(crate) node: i32,
    pub(crate) depth: usize,
    pub(crate) value: i32,
}

impl<E: Encoding> Clone for Cedar<E> {
    fn clone(&self) -> Self {
        Self::from_parts(self.alloc.clone(), self.ordered)
    }
}

impl<E: Encoding> Default for Cedar<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Encoding> fmt::Debug for Cedar<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (String::from_utf8_lossy(&k).into_owned(), v)))
            .finish()
    }
}

impl<E: Encoding> Cedar<E> {
    pub fn new() -> Self {
        let opts = Options::default();
        Self::from_parts(
            Allocator::new(E::ROOT_BASE, opts.max_trial, opts.growth),
            opts.ordered,
        )
    }

    pub fn with_options(opts: Options) -> Result<Self> {
        opts.validate()?;
        Ok(Self::from_parts(
            Allocator::new(E::ROOT_BASE, opts.max_trial, opts.growth),
            opts.ordered,
        ))
    }

    pub(crate) fn from_parts(alloc: Allocator, ordered: bool) -> Self {
        Self {
            alloc,
            ordered,
            _encoding: PhantomData,
        }
    }

    pub fn options(&self) -> Options {
        Options {
            ordered: self.ordered,
            max_trial: self.alloc.max_trial,
            growth: self.alloc.growth,
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn is_reduced(&self) -> bool {
        E::REDUCED
    }

    /// Slots allocated in the double array.
    pub fn capacity(&self) -> usize {
        self.alloc.capacity
    }

    /// Slots handed out as blocks so far.
    pub fn allocated_slots(&self) -> usize {
        self.alloc.size
    }

    /// Unused slots across all handed-out blocks. Once every key is erased
    /// this is `allocated_slots() - 1`: everything but the root.
    pub fn free_slots(&self) -> usize {
        self.alloc.free_slots()
    }

    pub fn allocation(&self) -> Allocation {
        Allocation {
            nodes: self.alloc.nodes.byte_size(),
            links: self.alloc.links.byte_size(),
            blocks: self.alloc.blocks.byte_size(),
            reject: self.alloc.reject.byte_size(),
        }
    }

    /// Whether any buffer still reads from a mapped image.
    pub fn is_mapped(&self) -> bool {
        self.alloc.nodes.is_mapped()
            || self.alloc.links.is_mapped()
            || self.alloc.blocks.is_mapped()
            || self.alloc.reject.is_mapped()
    }

    /// Stores `value` under `key`, returning the value it replaced.
    pub fn update(&mut self, key: &[u8], value: i32) -> Result<Option<i32>> {
        if key.is_empty() {
            return Err(CedarError::EmptyKey);
        }
        if let Some(offset) = key.iter().position(|&b| b == 0) {
            return Err(CedarError::NulByte { offset });
        }
        E::check_value(value)?;

        let mut from = 0;
        for &label in key {
            let raw = self.alloc.nodes.base(from);
            if E::is_value_leaf(raw) && raw != VALUE_LIMIT {
                // The leaf is about to gain a child: its value moves to a terminal.
                let to = self.follow(from, 0);
                self.alloc.nodes.set_base(to, raw);
            }
            from = self.follow(from, label);
        }

        let previous = self.value_at(from).found();
        let to = if E::is_value_leaf(self.alloc.nodes.base(from)) {
            from
        } else {
            self.follow(from, 0)
        };
        self.alloc.nodes.set_base(to, value);
        Ok(previous)
    }

    /// Inserts every pair in order. Stops at the first rejected key.
    pub fn build<K, I>(&mut self, pairs: I) -> Result<()>
    where
        K: AsRef<[u8]>,
        I: IntoIterator<Item = (K, i32)>,
    {
        for (key, value) in pairs {
            self.update(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Inserts each key with its position in the sequence as value.
    pub fn build_keys<K, I>(&mut self, keys: I) -> Result<()>
    where
        K: AsRef<[u8]>,
        I: IntoIterator<Item = K>,
    {
        for (i, key) in keys.into_iter().enumerate() {
            let value = i32::try_from(i).map_err(|_| CedarError::ValueOutOfRange(i32::MAX))?;
            self.update(key.as_ref(), value)?;
        }
        Ok(())
    }

    pub fn find(&self, key: &[u8]) -> Lookup {
        let mut from = 0;
        self.find_from(key, &mut from)
    }

    /// The stored key `key` as a [`Match`].
    pub fn get(&self, key: &[u8]) -> Option<Match> {
        let mut from = 0;
        let value = self.find_from(key, &mut from).found()?;
        Some(Match {
            value,
            length: key.len(),
            node: from,
        })
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.find(key).is_found()
    }

    /// Removes `key` and the chain of nodes only it used. Prefixes without a
    /// value and absent keys leave the trie untouched.
    pub fn erase(&mut self, key: &[u8]) -> Lookup {
        let mut from = 0;
        let found = self.find_from(key, &mut from);
        if found.is_found() {
            self.erase_from(from);
        }
        found
    }

    /// Keys starting with `prefix`, in sibling-chain order.
    pub fn predict<'a>(&'a self, prefix: &[u8]) -> PredictIter<'a, E> {
        PredictIter::new(self, prefix)
    }

    /// Stored keys that are prefixes of `key`, shortest first.
    pub fn with_common_prefix<'a>(&'a self, key: &'a [u8]) -> PrefixIter<'a, E> {
        PrefixIter::new(self, key)
    }

    /// Every occurrence of a stored key inside `text`.
    pub fn scan<'a>(&'a self, text: &'a [u8]) -> ScanIter<'a, E> {
        ScanIter::new(self, text)
    }

    /// All `(key, value)` pairs.
    pub fn iter(&self) -> Iter<'_, E> {
        Iter::new(self)
    }

    pub fn keys(&self) -> Keys<'_, E> {
        Keys::new(self)
    }

    pub fn values(&self) -> Values<'_, E> {
        Values::new(self)
    }

    /// The last `len` bytes of the key ending at `node`.
    pub fn suffix(&self, node: i32, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.suffix_into(node, &mut buf);
        buf
    }

    /// Fills `buf` with the last `buf.len()` bytes of the key ending at
    /// `node`, writing right to left.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is longer than the key ending at `node`.
    pub fn suffix_into(&self, mut node: i32, buf: &mut [u8]) {
        let nodes = &self.alloc.nodes;
        let len = buf.len();
        for slot in buf.iter_mut().rev() {
            assert!(node > 0, "suffix of {len} bytes reaches past the root");
            let parent = nodes.check(node);
            *slot = (E::child_base(nodes.base(parent)) ^ node) as u8;
            node = parent;
        }
    }

    /// The bytes of `m` as returned by a query: the full key for prefix
    /// searches, the part after the prefix for predictive ones.
    pub fn suffix_of(&self, m: &Match) -> Vec<u8> {
        self.suffix(m.node, m.length)
    }

    /// Walks `key` from `*from`, leaving `*from` at the last node reached.
    pub(crate) fn find_from(&self, key: &[u8], from: &mut i32) -> Lookup {
        let nodes = &self.alloc.nodes;
        for &label in key {
            let base = E::child_base(nodes.base(*from));
            if label == 0 || base < 0 {
                return Lookup::Absent;
            }
            let to = base ^ label as i32;
            if nodes.check(to) != *from {
                return Lookup::Absent;
            }
            *from = to;
        }
        self.value_at(*from)
    }

    /// Value stored for the key ending at `node`.
    pub(crate) fn value_at(&self, node: i32) -> Lookup {
        let nodes = &self.alloc.nodes;
        let raw = nodes.base(node);
        if E::is_value_leaf(raw) {
            return if raw == VALUE_LIMIT {
                Lookup::NoValue
            } else {
                Lookup::Found(raw)
            };
        }
        let base = E::child_base(raw);
        if base >= 0 && nodes.check(base) == node {
            Lookup::Found(nodes.base(base))
        } else {
            Lookup::NoValue
        }
    }

    /// Descends from `from` to its leftmost key.
    pub(crate) fn begin(&self, mut from: i32, mut depth: usize) -> Option<Cursor> {
        let nodes = &self.alloc.nodes;
        let links = &self.alloc.links;
        let mut c = links.child(from);
        if from == 0 {
            // Skip the root's own label-0 slot.
            c = links.sibling(E::child_base(nodes.base(0)) ^ c as i32);
            if c == 0 {
                return None;
            }
        }
        while c != 0 {
            from = E::child_base(nodes.base(from)) ^ c as i32;
            c = links.child(from);
            depth += 1;
        }
        let raw = nodes.base(from);
        let value = if E::is_value_leaf(raw) {
            raw
        } else {
            nodes.base(E::child_base(raw))
        };
        Some(Cursor {
            node: from,
            depth,
            value,
        })
    }

    /// The key after `cursor` within the subtree of `root`.
    pub(crate) fn next(&self, cursor: Cursor, root: i32) -> Option<Cursor> {
        let nodes = &self.alloc.nodes;
        let links = &self.alloc.links;
        let Cursor {
            node: mut from,
            mut depth,
            ..
        } = cursor;

        let raw = nodes.base(from);
        let mut c = if E::is_value_leaf(raw) {
            0
        } else {
            links.sibling(E::child_base(raw))
        };
        while c == 0 && from != root {
            c = links.sibling(from);
            from = nodes.check(from);
            depth -= 1;
        }
        if c == 0 {
            return None;
        }
        let to = E::child_base(nodes.base(from)) ^ c as i32;
        self.begin(to, depth + 1)
    }

    /// The child of `from` labelled `label`, creating it if needed.
    fn follow(&mut self, from: i32, label: u8) -> i32 {
        let base = E::child_base(self.alloc.nodes.base(from));
        if base < 0 || self.alloc.nodes.check(base ^ label as i32) < 0 {
            let to = self.alloc.pop_e_node::<E>(base, label, from);
            self.push_sibling(from, to ^ label as i32, label, base >= 0);
            return to;
        }
        let to = base ^ label as i32;
        if self.alloc.nodes.check(to) != from {
            return self.resolve(from, base, label);
        }
        to
    }

    /// Slot `base_n ^ label_n` is owned by another parent. Moves whichever of
    /// the two parents has fewer children to fresh slots and returns the slot
    /// now available for `label_n`.
    fn resolve(&mut self, mut from_n: i32, base_n: i32, label_n: u8) -> i32 {
        let to_pn = base_n ^ label_n as i32;
        let from_p = self.alloc.nodes.check(to_pn);
        let base_p = E::child_base(self.alloc.nodes.base(from_p));

        let flag = self.consult(
            base_n,
            base_p,
            self.alloc.links.child(from_n),
            self.alloc.links.child(from_p),
        );
        let children = if flag {
            self.set_child(base_n, self.alloc.links.child(from_n), label_n, true)
        } else {
            self.set_child(base_p, self.alloc.links.child(from_p), 0xFF, false)
        };
        let place = if children.len() == 1 {
            self.alloc.find_place()
        } else {
            self.alloc.find_places(&children)
        };
        let base = place ^ children[0] as i32;

        let (from, base_) = if flag { (from_n, base_n) } else { (from_p, base_p) };
        if flag && children[0] == label_n {
            self.alloc.links.set_child(from, label_n);
        }
        self.alloc.nodes.set_base(from, E::encode_base(base));

        for (i, &label) in children.iter().enumerate() {
            let to = self.alloc.pop_e_node::<E>(base, label, from);
            let to_ = base_ ^ label as i32;
            let next = children.get(i + 1).copied().unwrap_or(0);
            self.alloc.links.set_sibling(to, next);
            if flag && to_ == to_pn {
                // The requested label has no old slot to move.
                continue;
            }

            let raw = self.alloc.nodes.base(to_);
            self.alloc.nodes.set_base(to, raw);
            if label != 0 && !E::is_value_leaf(raw) && E::child_base(raw) >= 0 {
                let mut c = self.alloc.links.child(to_);
                self.alloc.links.set_child(to, c);
                let child_base = E::child_base(raw);
                loop {
                    let grandchild = child_base ^ c as i32;
                    self.alloc.nodes.set_check(grandchild, to);
                    c = self.alloc.links.sibling(grandchild);
                    if c == 0 {
                        break;
                    }
                }
            }

            if !flag && to_ == from_n {
                from_n = to;
            }
            if !flag && to_ == to_pn {
                self.push_sibling(from_n, to_pn ^ label_n as i32, label_n, true);
                self.alloc.links.set_child(to_, 0);
                self.alloc.nodes.set_node(to_, E::fresh(label_n), from_n);
            } else {
                self.alloc.push_e_node(to_);
            }
        }

        if flag {
            base ^ label_n as i32
        } else {
            to_pn
        }
    }

    /// True when `from_n` (with the new label) has fewer children than
    /// `from_p` and should be the one to move.
    fn consult(&self, base_n: i32, base_p: i32, mut c_n: u8, mut c_p: u8) -> bool {
        let links = &self.alloc.links;
        loop {
            c_n = links.sibling(base_n ^ c_n as i32);
            c_p = links.sibling(base_p ^ c_p as i32);
            if c_n == 0 || c_p == 0 {
                break;
            }
        }
        c_p != 0
    }

    /// Child labels of the node with child offset `base` and first child
    /// `c`, with `label` spliced in when `not_terminal`. A terminal label
    /// stays first; in ordered tries `label` lands in sorted position,
    /// otherwise right after the terminal.
    fn set_child(
        &self,
        base: i32,
        mut c: u8,
        label: u8,
        not_terminal: bool,
    ) -> SmallVec<[u8; 32]> {
        let links = &self.alloc.links;
        let mut children = SmallVec::new();
        if c == 0 {
            children.push(c);
            c = links.sibling(base ^ c as i32);
        }
        if self.ordered {
            while c != 0 && c <= label {
                children.push(c);
                c = links.sibling(base ^ c as i32);
            }
        }
        if not_terminal {
            children.push(label);
        }
        while c != 0 {
            children.push(c);
            c = links.sibling(base ^ c as i32);
        }
        children
    }

    /// Links the new child `label` into the sibling chain of `from`.
    fn push_sibling(&mut self, from: i32, base: i32, label: u8, has_child: bool) {
        let links = &mut self.alloc.links;
        let first = links.child(from);
        let after_first = if self.ordered { label > first } else { first == 0 };
        if has_child && after_first {
            let mut ix = base ^ first as i32;
            let mut c = links.sibling(ix);
            while self.ordered && c != 0 && c < label {
                ix = base ^ c as i32;
                c = links.sibling(ix);
            }
            links.set_sibling(ix, label);
            links.set_sibling(base ^ label as i32, c);
        } else {
            links.set_child(from, label);
            links.set_sibling(base ^ label as i32, first);
        }
    }

    /// Unlinks child `label` from the sibling chain of `from`.
    fn pop_sibling(&mut self, from: i32, base: i32, label: u8) {
        let links = &mut self.alloc.links;
        let next = links.sibling(base ^ label as i32);
        let mut c = links.child(from);
        if c == label {
            links.set_child(from, next);
            return;
        }
        loop {
            let ix = base ^ c as i32;
            c = links.sibling(ix);
            if c == label {
                links.set_sibling(ix, next);
                return;
            }
            debug_assert_ne!(c, 0, "label {label} missing from children of {from}");
            if c == 0 {
                return;
            }
        }
    }

    /// Frees the value slot of the key ending at `from`, then every ancestor
    /// left without children, stopping at the first one with siblings.
    fn erase_from(&mut self, from: i32) {
        let raw = self.alloc.nodes.base(from);
        let mut e = if E::is_value_leaf(raw) {
            from
        } else {
            E::child_base(raw)
        };
        let mut from = self.alloc.nodes.check(e);
        loop {
            let base = E::child_base(self.alloc.nodes.base(from));
            let first = self.alloc.links.child(from);
            let has_sibling = self.alloc.links.sibling(base ^ first as i32) != 0;
            if has_sibling {
                self.pop_sibling(from, base, (base ^ e) as u8);
            }
            self.alloc.push_e_node(e);
            e = from;
            from = self.alloc.nodes.check(from);
            if has_sibling {
                break;
            }
        }
    }
}
