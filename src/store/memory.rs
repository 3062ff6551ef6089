use std::collections::BTreeMap;

use super::{ScanIter, Store};
use crate::error::Result;

/// An in-memory engine backed by a `BTreeMap`, with an undo log so that
/// commit and rollback honor the `Store` contract. Nothing is durable; it
/// is the engine used for tests and throwaway stores.
#[derive(Debug, Default)]
pub struct Memory {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    undo: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for Memory {
    type ScanIterator<'a> = ScanIter<'a>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let prior = self.data.insert(key.to_vec(), value);
        self.undo.push((key.to_vec(), prior));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        if let Some(prior) = self.data.remove(key) {
            self.undo.push((key.to_vec(), Some(prior)));
        }
        Ok(())
    }

    fn scan(&self, lo: &[u8], hi: &[u8]) -> Self::ScanIterator<'_> {
        ScanIter::new(&self.data, lo, hi)
    }

    fn commit(&mut self) -> Result<()> {
        self.undo.clear();
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        for (key, prior) in self.undo.drain(..).rev() {
            match prior {
                Some(value) => self.data.insert(key, value),
                None => self.data.remove(&key),
            };
        }
        Ok(())
    }
}
