//! The store facade: opening, the shared session, roots, and transaction
//! control.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::buffer::Buffer;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::path::{Path, RecordKind};
use crate::store::{Log, Memory, Store};
use crate::view::{node_at, probe, Array, Node, Object};

/// The state every view of a store shares: the buffered overlay plus the
/// read-only flag raised by corruption errors. Lives behind the session
/// mutex; each view operation holds the lock only for its own duration.
pub(crate) struct Session<S: Store> {
    buffer: Option<Buffer<S>>,
    poisoned: bool,
}

impl<S: Store> Session<S> {
    fn new(store: S) -> Self {
        Self {
            buffer: Some(Buffer::new(store)),
            poisoned: false,
        }
    }

    pub(crate) fn buffer(&self) -> Result<&Buffer<S>> {
        self.buffer.as_ref().ok_or(Error::Closed)
    }

    pub(crate) fn buffer_mut(&mut self) -> Result<&mut Buffer<S>> {
        self.buffer.as_mut().ok_or(Error::Closed)
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.buffer.is_none() {
            return Err(Error::Closed);
        }
        if self.poisoned {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Raises the read-only flag when an operation surfaces corruption.
    pub(crate) fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::Corrupt(_))) {
            self.poisoned = true;
        }
        result
    }
}

/// Runs an operation under the session lock, routing its result through
/// the corruption observer.
pub(crate) fn with_session<S: Store, T>(
    session: &Arc<Mutex<Session<S>>>,
    op: impl FnOnce(&mut Session<S>) -> Result<T>,
) -> Result<T> {
    let mut guard = session.lock().map_err(Error::from)?;
    let result = op(&mut guard);
    guard.observe(result)
}

/// A persistent JSON object-graph store.
///
/// A `Db` is a shared handle to one session; clones and views all address
/// the same single-writer store. Mutations buffer in memory until
/// [`commit`](Db::commit) flushes them atomically into the engine;
/// [`abort`](Db::abort) discards them. Closing or dropping the store
/// without committing discards pending writes.
pub struct Db<S: Store> {
    session: Arc<Mutex<Session<S>>>,
}

impl<S: Store> Clone for Db<S> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone() }
    }
}

impl Db<Log> {
    /// Opens or creates a disk-backed store at `path` with default options.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::open_with(path, Options::default())
    }

    /// Opens or creates a disk-backed store at `path`.
    pub fn open_with<P: AsRef<std::path::Path>>(path: P, options: Options) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "opening store");
        Ok(Self::with_store(Log::open(path, options)?))
    }
}

impl Db<Memory> {
    /// An in-memory store, mostly useful for tests.
    pub fn memory() -> Self {
        Self::with_store(Memory::new())
    }
}

impl<S: Store> Db<S> {
    /// Wraps any engine implementing the [`Store`] contract.
    pub fn with_store(store: S) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new(store))),
        }
    }

    /// The root of the graph. Fails with a missing-key error on an empty
    /// store; use [`root_object`](Db::root_object) or
    /// [`root_array`](Db::root_array) to create one.
    pub fn root(&self) -> Result<Node<S>> {
        with_session(&self.session, |session| {
            node_at(session, &self.session, &Path::root())?
                .ok_or_else(|| Error::MissingKey("(root)".to_string()))
        })
    }

    /// The root object view, writing its marker on first use. Fails with a
    /// type mismatch if the root already holds something else.
    pub fn root_object(&self) -> Result<Object<S>> {
        with_session(&self.session, |session| match probe(session, &Path::root())? {
            Some(RecordKind::Object) => Ok(()),
            Some(kind) => Err(Error::TypeMismatch(format!(
                "root is a {}, not an object",
                kind.label()
            ))),
            None => {
                session.check_writable()?;
                session.buffer_mut()?.write(Path::root().object_key(), Vec::new());
                Ok(())
            }
        })?;
        Ok(Object::new(self.session.clone(), Path::root()))
    }

    /// The root array view, writing its marker on first use. Fails with a
    /// type mismatch if the root already holds something else.
    pub fn root_array(&self) -> Result<Array<S>> {
        with_session(&self.session, |session| match probe(session, &Path::root())? {
            Some(RecordKind::Array) => Ok(()),
            Some(kind) => Err(Error::TypeMismatch(format!(
                "root is a {}, not an array",
                kind.label()
            ))),
            None => {
                session.check_writable()?;
                session
                    .buffer_mut()?
                    .write(Path::root().array_key(), b"0".to_vec());
                Ok(())
            }
        })?;
        Ok(Array::new(self.session.clone(), Path::root()))
    }

    /// Atomically commits all buffered mutations to the engine.
    pub fn commit(&self) -> Result<()> {
        with_session(&self.session, |session| {
            session.check_writable()?;
            session.buffer_mut()?.commit()
        })
    }

    /// Discards all buffered mutations.
    pub fn abort(&self) -> Result<()> {
        with_session(&self.session, |session| {
            session.buffer_mut()?.abort();
            Ok(())
        })
    }

    /// Closes the store, discarding buffered mutations and releasing the
    /// engine. Later operations on this handle or its views fail.
    pub fn close(&self) -> Result<()> {
        let mut session = self.session.lock().map_err(Error::from)?;
        session.buffer = None;
        Ok(())
    }

    /// Runs `op` as a transaction: commit when it returns `Ok`, abort when
    /// it returns `Err`.
    pub fn transaction<T>(&self, op: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        match op(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.abort();
                Err(err)
            }
        }
    }
}
