/// Configuration for a disk-backed store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Fsync the log on every commit (default: true). Disabling trades
    /// crash durability for commit latency; atomicity is unaffected.
    pub sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { sync: true }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether commits fsync the log.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}
