//! Lazy query iterators.
//!
//! Each iterator borrows the trie, so it cannot outlive or observe a
//! mutation. Restarting a query means creating a new iterator.

use std::iter::FusedIterator;

use crate::encoding::Encoding;
use crate::trie::{Cedar, Cursor, Lookup, Match, TextMatch};

/// Stored keys that are prefixes of a query key. See
/// [`Cedar::with_common_prefix`].
pub struct PrefixIter<'a, E: Encoding> {
    cedar: &'a Cedar<E>,
    key: &'a [u8],
    from: i32,
    pos: usize,
}

impl<'a, E: Encoding> PrefixIter<'a, E> {
    pub(crate) fn new(cedar: &'a Cedar<E>, key: &'a [u8]) -> Self {
        Self {
            cedar,
            key,
            from: 0,
            pos: 0,
        }
    }
}

impl<E: Encoding> Iterator for PrefixIter<'_, E> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        while self.pos < self.key.len() {
            let i = self.pos;
            self.pos += 1;
            match self.cedar.find_from(&self.key[i..=i], &mut self.from) {
                Lookup::Found(value) => {
                    return Some(Match {
                        value,
                        length: i + 1,
                        node: self.from,
                    })
                }
                Lookup::NoValue => {}
                Lookup::Absent => self.pos = self.key.len(),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.key.len() - self.pos))
    }
}

impl<E: Encoding> FusedIterator for PrefixIter<'_, E> {}

/// Stored keys extending a prefix. See [`Cedar::predict`].
///
/// [`Match::length`] counts the bytes after the prefix.
pub struct PredictIter<'a, E: Encoding> {
    cedar: &'a Cedar<E>,
    root: i32,
    cursor: Option<Cursor>,
}

impl<'a, E: Encoding> PredictIter<'a, E> {
    pub(crate) fn new(cedar: &'a Cedar<E>, prefix: &[u8]) -> Self {
        let mut root = 0;
        let cursor = match cedar.find_from(prefix, &mut root) {
            Lookup::Absent => None,
            _ => cedar.begin(root, 0),
        };
        Self {
            cedar,
            root,
            cursor,
        }
    }
}

impl<E: Encoding> Iterator for PredictIter<'_, E> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        let cursor = self.cursor?;
        self.cursor = self.cedar.next(cursor, self.root);
        Some(Match {
            value: cursor.value,
            length: cursor.depth,
            node: cursor.node,
        })
    }
}

impl<E: Encoding> FusedIterator for PredictIter<'_, E> {}

/// Occurrences of stored keys inside a text. See [`Cedar::scan`].
///
/// Matches come ordered by start offset, then by length.
pub struct ScanIter<'a, E: Encoding> {
    cedar: &'a Cedar<E>,
    text: &'a [u8],
    start: usize,
    pos: usize,
    from: i32,
}

impl<'a, E: Encoding> ScanIter<'a, E> {
    pub(crate) fn new(cedar: &'a Cedar<E>, text: &'a [u8]) -> Self {
        Self {
            cedar,
            text,
            start: 0,
            pos: 0,
            from: 0,
        }
    }
}

impl<E: Encoding> Iterator for ScanIter<'_, E> {
    type Item = TextMatch;

    fn next(&mut self) -> Option<TextMatch> {
        while self.start < self.text.len() {
            while self.start + self.pos < self.text.len() {
                let at = self.start + self.pos;
                self.pos += 1;
                match self.cedar.find_from(&self.text[at..=at], &mut self.from) {
                    Lookup::Found(value) => {
                        return Some(TextMatch {
                            start: self.start,
                            end: at + 1,
                            value,
                        })
                    }
                    Lookup::NoValue => {}
                    Lookup::Absent => break,
                }
            }
            self.start += 1;
            self.pos = 0;
            self.from = 0;
        }
        None
    }
}

impl<E: Encoding> FusedIterator for ScanIter<'_, E> {}

/// All `(key, value)` pairs. See [`Cedar::iter`].
pub struct Iter<'a, E: Encoding> {
    inner: PredictIter<'a, E>,
}

impl<'a, E: Encoding> Iter<'a, E> {
    pub(crate) fn new(cedar: &'a Cedar<E>) -> Self {
        Self {
            inner: PredictIter::new(cedar, b""),
        }
    }
}

impl<E: Encoding> Iterator for Iter<'_, E> {
    type Item = (Vec<u8>, i32);

    fn next(&mut self) -> Option<Self::Item> {
        let m = self.inner.next()?;
        Some((self.inner.cedar.suffix_of(&m), m.value))
    }
}

impl<E: Encoding> FusedIterator for Iter<'_, E> {}

pub struct Keys<'a, E: Encoding> {
    inner: Iter<'a, E>,
}

impl<'a, E: Encoding> Keys<'a, E> {
    pub(crate) fn new(cedar: &'a Cedar<E>) -> Self {
        Self {
            inner: Iter::new(cedar),
        }
    }
}

impl<E: Encoding> Iterator for Keys<'_, E> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.inner.next().map(|(k, _)| k)
    }
}

pub struct Values<'a, E: Encoding> {
    inner: PredictIter<'a, E>,
}

impl<'a, E: Encoding> Values<'a, E> {
    pub(crate) fn new(cedar: &'a Cedar<E>) -> Self {
        Self {
            inner: PredictIter::new(cedar, b""),
        }
    }
}

impl<E: Encoding> Iterator for Values<'_, E> {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        self.inner.next().map(|m| m.value)
    }
}
