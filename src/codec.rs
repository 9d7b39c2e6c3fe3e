//! Image format.
//!
//! An image is a fixed 100-byte little-endian header followed by the raw
//! bytes of the node, link, block and reject buffers:
//!
//! ```text
//! flags:i32 head_full:i32 head_closed:i32 head_open:i32 max_trial:i32
//! capacity:i64 size:i64
//! nodes_pos:i64 links_pos:i64 blocks_pos:i64 reject_pos:i64
//! nodes_len:i64 links_len:i64 blocks_len:i64 reject_len:i64
//! ```
//!
//! `*_pos` are record counts and `*_len` byte lengths. Sections follow the
//! header back to back in the order above, so a mapped load can point each
//! buffer straight at its slice of the file.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use memmap2::MmapOptions;
use tracing::debug;

use crate::alloc::{Allocator, BLOCK_SIZE};
use crate::buffer::{Block, Bytes, Node, NodeLink, Record, RecordBuffer, Reject, REJECT_LEN};
use crate::encoding::{Encoding, Reduced, Standard};
use crate::error::{CedarError, Result};
use crate::options::Options;
use crate::trie::Cedar;

pub(crate) const HEADER_LEN: usize = 5 * 4 + 10 * 8;

/// How [`Cedar::open`] brings an image into memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Read the whole file into owned buffers.
    #[default]
    Copy,
    /// Map each section privately. Pages are read on demand and writes stay
    /// in memory; the first growth moves the affected buffer to the heap.
    Mapped,
    /// Map each section shared and read-write. Updates that fit in the
    /// loaded capacity are written through to the file; the first growth
    /// moves the affected buffer to the heap, after which its changes stay
    /// in memory.
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    flags: i32,
    head_full: i32,
    head_closed: i32,
    head_open: i32,
    max_trial: i32,
    capacity: i64,
    size: i64,
    pos: [i64; 4],
    lens: [i64; 4],
}

/// Byte range of one section within the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Section {
    offset: usize,
    len: usize,
}

impl Header {
    fn of<E: Encoding>(cedar: &Cedar<E>) -> Self {
        let a = &cedar.alloc;
        Self {
            flags: cedar.options().flags(),
            head_full: a.head_full,
            head_closed: a.head_closed,
            head_open: a.head_open,
            max_trial: a.max_trial,
            capacity: a.capacity as i64,
            size: a.size as i64,
            pos: [
                a.nodes.len() as i64,
                a.links.len() as i64,
                a.blocks.len() as i64,
                a.reject.len() as i64,
            ],
            lens: [
                a.nodes.byte_size() as i64,
                a.links.byte_size() as i64,
                a.blocks.byte_size() as i64,
                a.reject.byte_size() as i64,
            ],
        }
    }

    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut at = 0;
        for v in [self.flags, self.head_full, self.head_closed, self.head_open, self.max_trial] {
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
            at += 4;
        }
        let wide = [self.capacity, self.size]
            .into_iter()
            .chain(self.pos)
            .chain(self.lens);
        for v in wide {
            out[at..at + 8].copy_from_slice(&v.to_le_bytes());
            at += 8;
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CedarError::Corrupt("image shorter than its header"));
        }
        let i32_at = |i: usize| {
            let at = i * 4;
            i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let i64_at = |i: usize| {
            let at = 20 + i * 8;
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[at..at + 8]);
            i64::from_le_bytes(b)
        };
        Ok(Self {
            flags: i32_at(0),
            head_full: i32_at(1),
            head_closed: i32_at(2),
            head_open: i32_at(3),
            max_trial: i32_at(4),
            capacity: i64_at(0),
            size: i64_at(1),
            pos: [i64_at(2), i64_at(3), i64_at(4), i64_at(5)],
            lens: [i64_at(6), i64_at(7), i64_at(8), i64_at(9)],
        })
    }

    /// Checks the header against itself and the image length, returning the
    /// node, link, block and reject sections.
    fn sections(&self, total: usize) -> Result<[Section; 4]> {
        let block = BLOCK_SIZE as i64;
        if self.capacity < block || self.capacity % block != 0 || self.capacity > i32::MAX as i64 + 1 {
            return Err(CedarError::Corrupt("capacity is not a positive multiple of 256"));
        }
        if self.size < block || self.size % block != 0 || self.size > self.capacity {
            return Err(CedarError::Corrupt("size out of range"));
        }
        let blocks = self.capacity / block;
        let used_blocks = self.size / block;
        for head in [self.head_full, self.head_closed, self.head_open] {
            if head < 0 || head as i64 >= used_blocks {
                return Err(CedarError::Corrupt("block list head out of range"));
            }
        }

        let expected_pos = [self.capacity, self.capacity, blocks, REJECT_LEN as i64];
        let record_sizes = [Node::SIZE, NodeLink::SIZE, Block::SIZE, Reject::SIZE];
        let mut out = [Section { offset: 0, len: 0 }; 4];
        let mut offset = HEADER_LEN;
        for i in 0..4 {
            if self.pos[i] != expected_pos[i] {
                return Err(CedarError::Corrupt("section record count mismatch"));
            }
            if self.lens[i] != expected_pos[i] * record_sizes[i] as i64 {
                return Err(CedarError::Corrupt("section length mismatch"));
            }
            let len = self.lens[i] as usize;
            out[i] = Section { offset, len };
            offset += len;
        }
        if offset > total {
            return Err(CedarError::Corrupt("image truncated"));
        }
        Ok(out)
    }
}

impl<E: Encoding> Cedar<E> {
    /// Bytes written by [`write_to`](Self::write_to).
    pub fn image_size(&self) -> usize {
        HEADER_LEN + self.allocation().total()
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&Header::of(self).encode())?;
        w.write_all(self.alloc.nodes.as_bytes())?;
        w.write_all(self.alloc.links.as_bytes())?;
        w.write_all(self.alloc.blocks.as_bytes())?;
        w.write_all(self.alloc.reject.as_bytes())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.image_size());
        out.extend_from_slice(&Header::of(self).encode());
        out.extend_from_slice(self.alloc.nodes.as_bytes());
        out.extend_from_slice(self.alloc.links.as_bytes());
        out.extend_from_slice(self.alloc.blocks.as_bytes());
        out.extend_from_slice(self.alloc.reject.as_bytes());
        out
    }

    /// Writes the image to `path`, replacing any existing file.
    ///
    /// Do not target the file a trie is currently mapped from: truncating
    /// it invalidates the mapping.
    pub fn serialize_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path)?);
        self.write_to(&mut w)?;
        w.flush()?;
        debug!(path = %path.display(), bytes = self.image_size(), "cedar.serialize");
        Ok(())
    }

    /// Loads an image held in memory, copying it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = Header::decode(bytes)?;
        let sections = header.sections(bytes.len())?;
        let parts = sections.map(|s| Bytes::Owned(bytes[s.offset..s.offset + s.len].to_vec()));
        Self::assemble(&header, parts)
    }

    /// Loads the image at `path`.
    ///
    /// With [`LoadMode::Mapped`] or [`LoadMode::Shared`] the trie reads
    /// straight from a mapping of the file. The file must not be modified
    /// or truncated by anyone else while the trie is alive.
    pub fn open(path: impl AsRef<Path>, mode: LoadMode) -> Result<Self> {
        let path = path.as_ref();
        let cedar = match mode {
            LoadMode::Copy => Self::from_bytes(&std::fs::read(path)?)?,
            LoadMode::Mapped | LoadMode::Shared => {
                let shared = mode == LoadMode::Shared;
                let mut file = File::options().read(true).write(shared).open(path)?;
                let total = file.metadata()?.len() as usize;
                let mut head = [0u8; HEADER_LEN];
                file.read_exact(&mut head)
                    .map_err(|_| CedarError::Corrupt("image shorter than its header"))?;
                let header = Header::decode(&head)?;
                let sections = header.sections(total)?;

                let mut parts = Vec::with_capacity(4);
                for s in sections {
                    let mut opts = MmapOptions::new();
                    opts.offset(s.offset as u64).len(s.len);
                    // SAFETY: the section lies within the file, and the
                    // caller keeps the file unchanged by others for the
                    // life of the trie.
                    let map = unsafe {
                        if shared {
                            opts.map_mut(&file)?
                        } else {
                            opts.map_copy(&file)?
                        }
                    };
                    parts.push(Bytes::Mapped(map));
                }
                let parts: [Bytes; 4] = parts
                    .try_into()
                    .map_err(|_| CedarError::Corrupt("missing image section"))?;
                Self::assemble(&header, parts)?
            }
        };
        debug!(
            path = %path.display(),
            ?mode,
            capacity = cedar.capacity(),
            reduced = E::REDUCED,
            "cedar.deserialize"
        );
        Ok(cedar)
    }

    fn assemble(header: &Header, parts: [Bytes; 4]) -> Result<Self> {
        let opts = Options::from_flags(header.flags, header.max_trial)?;
        let [nodes, links, blocks, reject] = parts;
        let nodes = RecordBuffer::<Node>::from_bytes(nodes);

        let root = nodes.get(0);
        if root.check != -1 {
            return Err(CedarError::Corrupt("root sentinel missing"));
        }
        if root.base != E::ROOT_BASE {
            let found = match root.base {
                b if b == Standard::ROOT_BASE => Standard::NAME,
                b if b == Reduced::ROOT_BASE => Reduced::NAME,
                _ => return Err(CedarError::Corrupt("root sentinel missing")),
            };
            return Err(CedarError::EncodingMismatch {
                expected: E::NAME,
                found,
            });
        }

        let alloc = Allocator {
            nodes,
            links: RecordBuffer::from_bytes(links),
            blocks: RecordBuffer::from_bytes(blocks),
            reject: RecordBuffer::from_bytes(reject),
            head_full: header.head_full,
            head_closed: header.head_closed,
            head_open: header.head_open,
            max_trial: opts.max_trial,
            capacity: header.capacity as usize,
            size: header.size as usize,
            growth: opts.growth,
        };
        Ok(Self::from_parts(alloc, opts.ordered))
    }
}
