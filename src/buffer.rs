//! The transactional overlay: an in-memory write set layered over the
//! engine, giving read-your-writes, abort, and atomic commit.

use std::collections::{btree_map, BTreeMap};
use std::iter::Peekable;
use std::ops::Bound;

use tracing::debug;

use crate::error::Result;
use crate::store::{ScanIterator, Store};

/// A write-buffer overlay over an engine.
///
/// Pending point writes use the engine's tombstone convention: `Some` is a
/// buffered value, `None` a buffered deletion. Whole-subtree deletions are
/// recorded as half-open key ranges that shadow the engine until commit; a
/// write recorded after such an erase wins over it, because the erase
/// removed any earlier pending entry in its range.
pub struct Buffer<S: Store> {
    store: S,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Range tombstones, keyed by range start, kept disjoint by merging.
    erased: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl<S: Store> Buffer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
            erased: BTreeMap::new(),
        }
    }

    /// The underlying engine. Reads bypass the overlay.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads a key, preferring the pending write set.
    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.pending.get(key) {
            return Ok(entry.clone());
        }
        if erased_contains(&self.erased, key) {
            return Ok(None);
        }
        self.store.get(key)
    }

    /// Buffers a write.
    pub fn write(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    /// Buffers a single-key deletion.
    pub fn erase(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Buffers the deletion of every key in `[lo, hi)`, pending writes
    /// included.
    pub fn erase_range(&mut self, mut lo: Vec<u8>, mut hi: Vec<u8>) {
        if lo >= hi {
            return;
        }
        let doomed: Vec<Vec<u8>> = self
            .pending
            .range(lo.clone()..hi.clone())
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            self.pending.remove(&key);
        }

        // Coalesce with overlapping or adjacent recorded ranges, so a
        // single predecessor lookup answers containment.
        if let Some((range_lo, range_hi)) = self
            .erased
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(lo.as_slice())))
            .next_back()
            .map(|(l, h)| (l.clone(), h.clone()))
        {
            if range_hi >= lo {
                self.erased.remove(&range_lo);
                lo = range_lo;
                if range_hi > hi {
                    hi = range_hi;
                }
            }
        }
        while let Some((range_lo, range_hi)) = self
            .erased
            .range(lo.clone()..=hi.clone())
            .next()
            .map(|(l, h)| (l.clone(), h.clone()))
        {
            self.erased.remove(&range_lo);
            if range_hi > hi {
                hi = range_hi;
            }
        }
        self.erased.insert(lo, hi);
    }

    /// Merge-iterates the engine and the pending writes over `[lo, hi)`,
    /// yielding one ascending sequence with pending entries overriding and
    /// tombstones suppressing.
    pub fn scan(&self, lo: &[u8], hi: &[u8]) -> Scan<'_, S::ScanIterator<'_>> {
        Scan {
            store: self.store.scan(lo, hi).peekable(),
            pending: self
                .pending
                .range::<[u8], _>((Bound::Included(lo), Bound::Excluded(hi)))
                .peekable(),
            erased: &self.erased,
        }
    }

    /// Flushes the pending state into the engine and commits it. On
    /// failure the engine is rolled back and the pending state kept, so
    /// the caller may retry or abort.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() && self.erased.is_empty() {
            return Ok(());
        }
        debug!(
            writes = self.pending.len(),
            ranges = self.erased.len(),
            "committing buffered writes"
        );
        if let Err(err) = self.flush() {
            let _ = self.store.rollback();
            return Err(err);
        }
        self.pending.clear();
        self.erased.clear();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // Apply range tombstones first: any pending write inside one was
        // recorded after it and must land on top.
        let mut doomed = Vec::new();
        for (lo, hi) in &self.erased {
            for entry in self.store.scan(lo, hi) {
                doomed.push(entry?.0);
            }
        }
        for key in doomed {
            self.store.delete(&key)?;
        }
        for (key, entry) in &self.pending {
            match entry {
                Some(value) => self.store.put(key, value.clone())?,
                None => self.store.delete(key)?,
            }
        }
        self.store.commit()
    }

    /// Discards all pending state. The engine is untouched.
    pub fn abort(&mut self) {
        self.pending.clear();
        self.erased.clear();
    }
}

fn erased_contains(erased: &BTreeMap<Vec<u8>, Vec<u8>>, key: &[u8]) -> bool {
    erased
        .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
        .next_back()
        .is_some_and(|(_, hi)| key < hi.as_slice())
}

/// A merged scan over the engine and the pending write set.
pub struct Scan<'a, I: ScanIterator> {
    store: Peekable<I>,
    pending: Peekable<btree_map::Range<'a, Vec<u8>, Option<Vec<u8>>>>,
    erased: &'a BTreeMap<Vec<u8>, Vec<u8>>,
}

impl<I: ScanIterator> Iterator for Scan<'_, I> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let store_key = match self.store.peek() {
                Some(Ok((key, _))) => Some(key.clone()),
                Some(Err(_)) => return self.store.next(),
                None => None,
            };
            let pending_key = self.pending.peek().map(|(key, _)| (*key).clone());

            match (pending_key, store_key) {
                (None, None) => return None,
                (Some(_), None) => {
                    let (key, entry) = self.pending.next().expect("peeked entry");
                    match entry {
                        Some(value) => return Some(Ok((key.clone(), value.clone()))),
                        None => continue,
                    }
                }
                (None, Some(key)) => {
                    let item = self.store.next().expect("peeked entry");
                    if erased_contains(self.erased, &key) {
                        continue;
                    }
                    return Some(item);
                }
                (Some(pending), Some(store)) => {
                    if pending <= store {
                        if pending == store {
                            self.store.next();
                        }
                        let (key, entry) = self.pending.next().expect("peeked entry");
                        match entry {
                            Some(value) => return Some(Ok((key.clone(), value.clone()))),
                            None => continue,
                        }
                    } else {
                        let item = self.store.next().expect("peeked entry");
                        if erased_contains(self.erased, &store) {
                            continue;
                        }
                        return Some(item);
                    }
                }
            }
        }
    }
}
