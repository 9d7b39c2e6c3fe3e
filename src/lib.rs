//! # cedar-rs
//!
//! An efficiently-updatable double-array trie mapping byte strings to `i32`
//! values.
//!
//! Based on "A Self-adaptive Double-Array Trie" (cedar, Naoki Yoshinaga).
//! Nodes live in a flat array of `(base, check)` pairs grouped in blocks of
//! 256; a block allocator with per-block free lists keeps insertion and
//! deletion cheap while the array stays compact.
//!
//! Two node encodings are available:
//!
//! * [`Cedar`] (standard): every value sits in a label-0 terminal child.
//! * [`ReducedCedar`]: leaves hold their value directly, saving a slot per
//!   key that is not a prefix of another key. Values must be in
//!   `0..VALUE_LIMIT`.
//!
//! A trie serializes to a flat image that can be loaded by copying or by
//! mapping the file, see [`Cedar::open`].
//!
//! ## Example
//!
//! ```rust
//! use cedar_rs::{Cedar, Lookup};
//!
//! let mut trie: Cedar = Cedar::new();
//! trie.update(b"hello", 1).unwrap();
//! trie.update(b"help", 2).unwrap();
//! trie.update(b"world", 3).unwrap();
//!
//! assert_eq!(trie.find(b"hello"), Lookup::Found(1));
//! assert_eq!(trie.find(b"hel"), Lookup::NoValue);
//!
//! let under_hel: Vec<i32> = trie.predict(b"hel").map(|m| m.value).collect();
//! assert_eq!(under_hel, vec![1, 2]);
//!
//! let hits: Vec<_> = trie.scan(b"say hello world").map(|m| (m.start, m.value)).collect();
//! assert_eq!(hits, vec![(4, 1), (10, 3)]);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod alloc;
mod buffer;
mod codec;
mod encoding;
mod error;
mod iter;
mod options;
mod trie;

pub use codec::LoadMode;
pub use encoding::{Encoding, Reduced, Standard, VALUE_LIMIT};
pub use error::{CedarError, Result};
pub use iter::{Iter, Keys, PredictIter, PrefixIter, ScanIter, Values};
pub use options::{Growth, Options};
pub use trie::{Allocation, Cedar, Lookup, Match, ReducedCedar, TextMatch};


#[cfg(test)]
mod proptests;
