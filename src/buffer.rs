//! Fixed-width record buffers.
//!
//! Every buffer is a flat run of little-endian records over contiguous bytes.
//! The bytes either live on the heap or inside a mapped section of an image
//! file; the layout is identical in both cases, which is what lets an image
//! be loaded without copying.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use memmap2::MmapMut;
use tracing::debug;

/// Number of entries in the reject table (free counts `0..=256`).
pub(crate) const REJECT_LEN: usize = 257;

/// Backing bytes of a record buffer.
pub(crate) enum Bytes {
    Owned(Vec<u8>),
    Mapped(MmapMut),
}

impl Bytes {
    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self, Bytes::Mapped(_))
    }
}

impl Deref for Bytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Bytes::Owned(v) => v,
            Bytes::Mapped(m) => m,
        }
    }
}

impl DerefMut for Bytes {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Bytes::Owned(v) => v,
            Bytes::Mapped(m) => m,
        }
    }
}

impl Clone for Bytes {
    /// Clones always land on the heap.
    fn clone(&self) -> Self {
        Bytes::Owned(self.to_vec())
    }
}

#[inline]
fn read_i32(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

#[inline]
fn write_i32(b: &mut [u8], at: usize, v: i32) {
    b[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn read_i16(b: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([b[at], b[at + 1]])
}

#[inline]
fn write_i16(b: &mut [u8], at: usize, v: i16) {
    b[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

/// A fixed-width record with a default value for freshly grown slots.
pub(crate) trait Record: Copy {
    const SIZE: usize;
    const NAME: &'static str;

    fn initial(index: usize) -> Self;
    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
}

/// A double-array slot.
///
/// Used slots hold `(base, check)` where `check` is the parent index. Free
/// slots hold `(-prev, -next)`, the links of their block's circular free
/// list. Whether a slot is used is decided by the sign of `check`: parents
/// are never negative, free links always are.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) base: i32,
    pub(crate) check: i32,
}

impl Record for Node {
    const SIZE: usize = 8;
    const NAME: &'static str = "nodes";

    fn initial(_: usize) -> Self {
        Self::default()
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            base: read_i32(bytes, 0),
            check: read_i32(bytes, 4),
        }
    }

    fn write(self, bytes: &mut [u8]) {
        write_i32(bytes, 0, self.base);
        write_i32(bytes, 4, self.check);
    }
}

/// Sibling/child labels of a slot. `0` ends a chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct NodeLink {
    pub(crate) sibling: u8,
    pub(crate) child: u8,
}

impl Record for NodeLink {
    const SIZE: usize = 2;
    const NAME: &'static str = "links";

    fn initial(_: usize) -> Self {
        Self::default()
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            sibling: bytes[0],
            child: bytes[1],
        }
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self.sibling;
        bytes[1] = self.child;
    }
}

/// Bookkeeping for one 256-slot block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Block {
    /// Previous block in the owning list.
    pub(crate) prev: i32,
    /// Next block in the owning list.
    pub(crate) next: i32,
    /// Free slots, `0..=256`.
    pub(crate) num: i16,
    /// Smallest child count known not to fit this block.
    pub(crate) reject: i16,
    /// Consecutive failed placement attempts.
    pub(crate) trial: i32,
    /// One free slot of the block, the entry point of its free list.
    pub(crate) head: i32,
}

impl Record for Block {
    const SIZE: usize = 20;
    const NAME: &'static str = "blocks";

    fn initial(_: usize) -> Self {
        Self {
            prev: 0,
            next: 0,
            num: 256,
            reject: 257,
            trial: 0,
            head: 0,
        }
    }

    fn read(bytes: &[u8]) -> Self {
        Self {
            prev: read_i32(bytes, 0),
            next: read_i32(bytes, 4),
            num: read_i16(bytes, 8),
            reject: read_i16(bytes, 10),
            trial: read_i32(bytes, 12),
            head: read_i32(bytes, 16),
        }
    }

    fn write(self, bytes: &mut [u8]) {
        write_i32(bytes, 0, self.prev);
        write_i32(bytes, 4, self.next);
        write_i16(bytes, 8, self.num);
        write_i16(bytes, 10, self.reject);
        write_i32(bytes, 12, self.trial);
        write_i32(bytes, 16, self.head);
    }
}

/// Reject-table entry: for a free count `n`, the smallest child count that
/// failed to fit a block holding `n` free slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Reject(pub(crate) i16);

impl Record for Reject {
    const SIZE: usize = 2;
    const NAME: &'static str = "reject";

    fn initial(index: usize) -> Self {
        Reject(index as i16 + 1)
    }

    fn read(bytes: &[u8]) -> Self {
        Reject(read_i16(bytes, 0))
    }

    fn write(self, bytes: &mut [u8]) {
        write_i16(bytes, 0, self.0);
    }
}

/// Growable array of `R` records.
#[derive(Clone)]
pub(crate) struct RecordBuffer<R> {
    bytes: Bytes,
    len: usize,
    _marker: PhantomData<R>,
}

pub(crate) type Nodes = RecordBuffer<Node>;
pub(crate) type NodeLinks = RecordBuffer<NodeLink>;
pub(crate) type Blocks = RecordBuffer<Block>;
pub(crate) type Rejects = RecordBuffer<Reject>;

impl<R: Record> RecordBuffer<R> {
    /// A heap buffer of `len` default-initialized records.
    pub(crate) fn new(len: usize) -> Self {
        let mut buf = Self {
            bytes: Bytes::Owned(Vec::new()),
            len: 0,
            _marker: PhantomData,
        };
        buf.resize(len);
        buf
    }

    /// Adopts existing record bytes. Trailing bytes short of a whole record
    /// are ignored.
    pub(crate) fn from_bytes(bytes: Bytes) -> Self {
        let len = bytes.len() / R::SIZE;
        Self {
            bytes,
            len,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn byte_size(&self) -> usize {
        self.len * R::SIZE
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.byte_size()]
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.bytes.is_mapped()
    }

    /// Explicit bounds check, independent of build profile.
    pub(crate) fn in_bounds(&self, index: usize) -> bool {
        index < self.len && (index + 1) * R::SIZE <= self.bytes.len()
    }

    #[inline]
    fn offset(&self, index: usize) -> usize {
        debug_assert!(
            self.in_bounds(index),
            "{} index {index} out of bounds (len={})",
            R::NAME,
            self.len
        );
        index * R::SIZE
    }

    pub(crate) fn get(&self, index: usize) -> R {
        let at = self.offset(index);
        R::read(&self.bytes[at..at + R::SIZE])
    }

    pub(crate) fn set(&mut self, index: usize, record: R) {
        let at = self.offset(index);
        record.write(&mut self.bytes[at..at + R::SIZE]);
    }

    /// Resizes to `new_len` records, keeping existing records and
    /// default-initializing the new ones. A mapped buffer is first copied to
    /// the heap, so the mapping is never written past its end.
    pub(crate) fn resize(&mut self, new_len: usize) {
        let old_len = self.len;
        let new_size = new_len * R::SIZE;

        if let Bytes::Mapped(map) = &self.bytes {
            let keep = self.byte_size().min(new_size);
            let owned = map[..keep].to_vec();
            debug!(buffer = R::NAME, bytes = keep, "cedar.unmap");
            self.bytes = Bytes::Owned(owned);
        }
        if let Bytes::Owned(v) = &mut self.bytes {
            v.resize(new_size, 0);
        }

        self.len = new_len;
        for i in old_len..new_len {
            self.set(i, R::initial(i));
        }
    }
}

impl RecordBuffer<Node> {
    #[inline]
    pub(crate) fn base(&self, i: i32) -> i32 {
        read_i32(&self.bytes, self.offset(i as usize))
    }

    #[inline]
    pub(crate) fn check(&self, i: i32) -> i32 {
        read_i32(&self.bytes, self.offset(i as usize) + 4)
    }

    #[inline]
    pub(crate) fn set_base(&mut self, i: i32, base: i32) {
        let at = self.offset(i as usize);
        write_i32(&mut self.bytes, at, base);
    }

    #[inline]
    pub(crate) fn set_check(&mut self, i: i32, check: i32) {
        let at = self.offset(i as usize) + 4;
        write_i32(&mut self.bytes, at, check);
    }

    #[inline]
    pub(crate) fn set_node(&mut self, i: i32, base: i32, check: i32) {
        self.set(i as usize, Node { base, check });
    }
}

impl RecordBuffer<NodeLink> {
    #[inline]
    pub(crate) fn sibling(&self, i: i32) -> u8 {
        self.bytes[self.offset(i as usize)]
    }

    #[inline]
    pub(crate) fn child(&self, i: i32) -> u8 {
        self.bytes[self.offset(i as usize) + 1]
    }

    #[inline]
    pub(crate) fn set_sibling(&mut self, i: i32, label: u8) {
        let at = self.offset(i as usize);
        self.bytes[at] = label;
    }

    #[inline]
    pub(crate) fn set_child(&mut self, i: i32, label: u8) {
        let at = self.offset(i as usize) + 1;
        self.bytes[at] = label;
    }

    #[inline]
    pub(crate) fn clear(&mut self, i: i32) {
        self.set(i as usize, NodeLink::default());
    }
}

impl RecordBuffer<Block> {
    #[inline]
    pub(crate) fn prev(&self, i: i32) -> i32 {
        read_i32(&self.bytes, self.offset(i as usize))
    }

    #[inline]
    pub(crate) fn next(&self, i: i32) -> i32 {
        read_i32(&self.bytes, self.offset(i as usize) + 4)
    }

    #[inline]
    pub(crate) fn num(&self, i: i32) -> i16 {
        read_i16(&self.bytes, self.offset(i as usize) + 8)
    }

    #[inline]
    pub(crate) fn reject(&self, i: i32) -> i16 {
        read_i16(&self.bytes, self.offset(i as usize) + 10)
    }

    #[inline]
    pub(crate) fn trial(&self, i: i32) -> i32 {
        read_i32(&self.bytes, self.offset(i as usize) + 12)
    }

    #[inline]
    pub(crate) fn head(&self, i: i32) -> i32 {
        read_i32(&self.bytes, self.offset(i as usize) + 16)
    }

    #[inline]
    pub(crate) fn set_prev(&mut self, i: i32, v: i32) {
        let at = self.offset(i as usize);
        write_i32(&mut self.bytes, at, v);
    }

    #[inline]
    pub(crate) fn set_next(&mut self, i: i32, v: i32) {
        let at = self.offset(i as usize) + 4;
        write_i32(&mut self.bytes, at, v);
    }

    #[inline]
    pub(crate) fn set_num(&mut self, i: i32, v: i16) {
        let at = self.offset(i as usize) + 8;
        write_i16(&mut self.bytes, at, v);
    }

    #[inline]
    pub(crate) fn set_reject(&mut self, i: i32, v: i16) {
        let at = self.offset(i as usize) + 10;
        write_i16(&mut self.bytes, at, v);
    }

    #[inline]
    pub(crate) fn set_trial(&mut self, i: i32, v: i32) {
        let at = self.offset(i as usize) + 12;
        write_i32(&mut self.bytes, at, v);
    }

    #[inline]
    pub(crate) fn set_head(&mut self, i: i32, v: i32) {
        let at = self.offset(i as usize) + 16;
        write_i32(&mut self.bytes, at, v);
    }
}

impl RecordBuffer<Reject> {
    #[inline]
    pub(crate) fn bound(&self, num: usize) -> i16 {
        self.get(num).0
    }

    #[inline]
    pub(crate) fn set_bound(&mut self, num: usize, v: i16) {
        self.set(num, Reject(v));
    }
}
