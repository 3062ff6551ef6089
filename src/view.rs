//! Live object and array views over the store.
//!
//! A view is a handle `(session, path)`; it owns no data and stays valid
//! across sibling mutations. Construction never reads. Every operation
//! takes the session lock for its own duration, re-checks that the view's
//! container marker still exists (a deleted or replaced path yields a
//! stale-view error), and translates the operation into codec keys and
//! buffered reads and writes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::db::{with_session, Session};
use crate::errcorrupt;
use crate::error::{Error, Result};
use crate::format;
use crate::path::{self, Path, RecordKind, Step};
use crate::store::Store;
use crate::value::Value;

/// A child of a container: a decoded scalar, or a live view of a nested
/// container.
pub enum Node<S: Store> {
    Scalar(Value),
    Object(Object<S>),
    Array(Array<S>),
}

impl<S: Store> Node<S> {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Scalar(value) => value.kind(),
            Node::Object(_) => "object",
            Node::Array(_) => "array",
        }
    }

    /// The scalar value, or a type mismatch error for containers.
    pub fn into_scalar(self) -> Result<Value> {
        match self {
            Node::Scalar(value) => Ok(value),
            node => Err(Error::TypeMismatch(format!("expected a scalar, found {}", node.kind()))),
        }
    }

    /// The object view, or a type mismatch error otherwise.
    pub fn into_object(self) -> Result<Object<S>> {
        match self {
            Node::Object(object) => Ok(object),
            node => Err(Error::TypeMismatch(format!("expected an object, found {}", node.kind()))),
        }
    }

    /// The array view, or a type mismatch error otherwise.
    pub fn into_array(self) -> Result<Array<S>> {
        match self {
            Node::Array(array) => Ok(array),
            node => Err(Error::TypeMismatch(format!("expected an array, found {}", node.kind()))),
        }
    }

    /// Materializes the node as an owned value, deep-copying containers.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Node::Scalar(value) => Ok(value.clone()),
            Node::Object(object) => object.to_value(),
            Node::Array(array) => array.to_value(),
        }
    }
}

/// A live view of a stored object.
pub struct Object<S: Store> {
    session: Arc<Mutex<Session<S>>>,
    path: Path,
}

impl<S: Store> Clone for Object<S> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone(), path: self.path.clone() }
    }
}

impl<S: Store> Object<S> {
    pub(crate) fn new(session: Arc<Mutex<Session<S>>>, path: Path) -> Self {
        Self { session, path }
    }

    /// The number of direct children.
    pub fn len(&self) -> Result<usize> {
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            Ok(child_steps(session, &self.path)?.len())
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether a direct child exists at `key`.
    pub fn contains(&self, key: &str) -> Result<bool> {
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            Ok(probe(session, &self.path.child_key(key))?.is_some())
        })
    }

    /// The child at `key`: a decoded scalar or a nested view.
    pub fn get(&self, key: &str) -> Result<Node<S>> {
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            node_at(session, &self.session, &self.path.child_key(key))?
                .ok_or_else(|| Error::MissingKey(key.to_string()))
        })
    }

    /// The child at `key`, materialized as an owned value.
    pub fn get_value(&self, key: &str) -> Result<Value> {
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            read_value(session, &self.path.child_key(key))?
                .ok_or_else(|| Error::MissingKey(key.to_string()))
        })
    }

    /// Assigns `value` at `key`, replacing any existing child wholesale.
    /// Containers are deep-copied; to assign another view's contents, pass
    /// its `to_value()`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            write_child(session, &self.path.child_key(key), &value)
        })
    }

    /// Deletes the child at `key` and its entire subtree.
    pub fn delete(&self, key: &str) -> Result<()> {
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            session.check_writable()?;
            match purge(session, &self.path.child_key(key))? {
                Some(_) => Ok(()),
                None => Err(Error::MissingKey(key.to_string())),
            }
        })
    }

    /// Iterates over `(key, child)` pairs in the codec's key order. The
    /// store must not be mutated through the iteration.
    pub fn iter(&self) -> ObjectIter<S> {
        let (lo, hi) = self.path.children_range(RecordKind::Object);
        ObjectIter {
            session: self.session.clone(),
            parent: self.path.clone(),
            next_lo: lo,
            hi,
        }
    }

    /// The child keys, in the codec's key order.
    pub fn keys(&self) -> Result<Vec<String>> {
        with_session(&self.session, |session| {
            ensure_live(session, &self.path, RecordKind::Object)?;
            child_steps(session, &self.path)?
                .into_iter()
                .map(|step| match step {
                    Step::Key(key) => Ok(key),
                    step => errcorrupt!("array step {step} under object {}", self.path),
                })
                .collect()
        })
    }

    /// Materializes the whole object as an owned value.
    pub fn to_value(&self) -> Result<Value> {
        with_session(&self.session, |session| {
            read_value(session, &self.path)?.ok_or_else(|| Error::Stale(self.path.to_string()))
        })
    }
}

/// A live view of a stored array.
pub struct Array<S: Store> {
    session: Arc<Mutex<Session<S>>>,
    path: Path,
}

impl<S: Store> Clone for Array<S> {
    fn clone(&self) -> Self {
        Self { session: self.session.clone(), path: self.path.clone() }
    }
}

impl<S: Store> Array<S> {
    pub(crate) fn new(session: Arc<Mutex<Session<S>>>, path: Path) -> Self {
        Self { session, path }
    }

    /// The array length, read from the length marker.
    pub fn len(&self) -> Result<usize> {
        with_session(&self.session, |session| live_len(session, &self.path))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Whether `index` is within bounds.
    pub fn contains(&self, index: usize) -> Result<bool> {
        Ok(index < self.len()?)
    }

    /// The element at `index`: a decoded scalar or a nested view.
    pub fn get(&self, index: usize) -> Result<Node<S>> {
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if index >= len {
                return Err(Error::OutOfRange(index));
            }
            let child = self.path.child_index(index);
            node_at(session, &self.session, &child)?
                .ok_or_else(|| Error::Corrupt(format!("array {} is missing element {index}", self.path)))
        })
    }

    /// The element at `index`, materialized as an owned value.
    pub fn get_value(&self, index: usize) -> Result<Value> {
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if index >= len {
                return Err(Error::OutOfRange(index));
            }
            read_value(session, &self.path.child_index(index))?
                .ok_or_else(|| Error::Corrupt(format!("array {} is missing element {index}", self.path)))
        })
    }

    /// Replaces the element at `index`, or appends when `index` equals the
    /// length. Sparse writes past the end fail.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if index > len {
                return Err(Error::OutOfRange(index));
            }
            write_child(session, &self.path.child_index(index), &value)?;
            if index == len {
                write_len(session, &self.path, len + 1)?;
            }
            Ok(())
        })
    }

    /// Appends an element.
    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            write_child(session, &self.path.child_index(len), &value)?;
            write_len(session, &self.path, len + 1)
        })
    }

    /// Inserts an element at `index`, rewriting the tail elements one slot
    /// up. O(tail) by design: the key encoding is positional.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if index > len {
                return Err(Error::OutOfRange(index));
            }
            session.check_writable()?;
            for at in (index..len).rev() {
                shift(session, &self.path, at, at + 1)?;
            }
            write_child(session, &self.path.child_index(index), &value)?;
            write_len(session, &self.path, len + 1)
        })
    }

    /// Removes the element at `index`, rewriting the tail elements one
    /// slot down.
    pub fn delete(&self, index: usize) -> Result<()> {
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if index >= len {
                return Err(Error::OutOfRange(index));
            }
            session.check_writable()?;
            for at in index..len - 1 {
                shift(session, &self.path, at + 1, at)?;
            }
            purge(session, &self.path.child_index(len - 1))?;
            write_len(session, &self.path, len - 1)
        })
    }

    /// Removes and returns the last element.
    pub fn pop(&self) -> Result<Value> {
        with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if len == 0 {
                return Err(Error::OutOfRange(0));
            }
            session.check_writable()?;
            let last = self.path.child_index(len - 1);
            let value = read_value(session, &last)?
                .ok_or_else(|| Error::Corrupt(format!("array {} is missing element {}", self.path, len - 1)))?;
            purge(session, &last)?;
            write_len(session, &self.path, len - 1)?;
            Ok(value)
        })
    }

    /// Iterates over the elements in index order. The store must not be
    /// mutated through the iteration.
    pub fn iter(&self) -> ArrayIter<S> {
        ArrayIter {
            session: self.session.clone(),
            path: self.path.clone(),
            index: 0,
        }
    }

    /// Materializes the whole array as an owned value.
    pub fn to_value(&self) -> Result<Value> {
        with_session(&self.session, |session| {
            read_value(session, &self.path)?.ok_or_else(|| Error::Stale(self.path.to_string()))
        })
    }
}

/// Iterator over an object's direct children. Each step seeks to the next
/// sibling past the previous child's subtree, so iteration costs
/// O(children), not O(descendants).
pub struct ObjectIter<S: Store> {
    session: Arc<Mutex<Session<S>>>,
    parent: Path,
    next_lo: Vec<u8>,
    hi: Vec<u8>,
}

impl<S: Store> Iterator for ObjectIter<S> {
    type Item = Result<(String, Node<S>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = with_session(&self.session, |session| {
            ensure_live(session, &self.parent, RecordKind::Object)?;
            let Some(child) = next_child(session, &self.parent, &self.next_lo, &self.hi)? else {
                return Ok(None);
            };
            let name = match child.step {
                Step::Key(name) => name,
                step => return errcorrupt!("array step {step} under object {}", self.parent),
            };
            let node = node_from(
                child.kind,
                &child.payload,
                &self.session,
                self.parent.child_key(&name),
            )?;
            Ok(Some((name, node, child.next_lo)))
        });
        match result {
            Ok(Some((name, node, next_lo))) => {
                self.next_lo = next_lo;
                Some(Ok((name, node)))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// Iterator over an array's elements by ascending index.
pub struct ArrayIter<S: Store> {
    session: Arc<Mutex<Session<S>>>,
    path: Path,
    index: usize,
}

impl<S: Store> Iterator for ArrayIter<S> {
    type Item = Result<Node<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = with_session(&self.session, |session| {
            let len = live_len(session, &self.path)?;
            if self.index >= len {
                return Ok(None);
            }
            let child = self.path.child_index(self.index);
            node_at(session, &self.session, &child)?
                .ok_or_else(|| {
                    Error::Corrupt(format!("array {} is missing element {}", self.path, self.index))
                })
                .map(Some)
        });
        match result {
            Ok(Some(node)) => {
                self.index += 1;
                Some(Ok(node))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

/// A direct child surfaced by a children scan: its step, the kind and
/// payload of its own record, and the scan position just past its subtree.
struct ChildRecord {
    step: Step,
    kind: RecordKind,
    payload: Vec<u8>,
    next_lo: Vec<u8>,
}

/// Determines what is stored at `path` by probing the three kind-suffixed
/// keys. More than one kind at the same path is corruption.
pub(crate) fn probe<S: Store>(session: &mut Session<S>, path: &Path) -> Result<Option<RecordKind>> {
    let buffer = session.buffer()?;
    let mut found: Option<RecordKind> = None;
    for kind in [RecordKind::Scalar, RecordKind::Object, RecordKind::Array] {
        if buffer.read(&path.key(kind))?.is_some() {
            if let Some(prior) = found {
                return errcorrupt!("{path} is both a {} and a {}", prior.label(), kind.label());
            }
            found = Some(kind);
        }
    }
    Ok(found)
}

/// Fails with a stale-view error unless `path` still holds a container of
/// the given kind.
fn ensure_live<S: Store>(session: &mut Session<S>, path: &Path, kind: RecordKind) -> Result<()> {
    if session.buffer()?.read(&path.key(kind))?.is_none() {
        return Err(Error::Stale(path.to_string()));
    }
    Ok(())
}

/// The length of the array at `path`, failing with a stale-view error if
/// its marker is gone.
fn live_len<S: Store>(session: &mut Session<S>, path: &Path) -> Result<usize> {
    array_len(session, path)?.ok_or_else(|| Error::Stale(path.to_string()))
}

/// Reads and parses an array's length marker, if present.
fn array_len<S: Store>(session: &mut Session<S>, path: &Path) -> Result<Option<usize>> {
    let Some(payload) = session.buffer()?.read(&path.array_key())? else {
        return Ok(None);
    };
    let len = std::str::from_utf8(&payload)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| {
            Error::Corrupt(format!(
                "array {path} has a malformed length {}",
                format::Raw::bytes(&payload)
            ))
        })?;
    Ok(Some(len))
}

fn write_len<S: Store>(session: &mut Session<S>, path: &Path, len: usize) -> Result<()> {
    session
        .buffer_mut()?
        .write(path.array_key(), len.to_string().into_bytes());
    Ok(())
}

/// Removes whatever is stored at `path`: a scalar's single record, or a
/// container's marker together with its whole subtree range. Returns the
/// kind that was removed.
fn purge<S: Store>(session: &mut Session<S>, path: &Path) -> Result<Option<RecordKind>> {
    let Some(kind) = probe(session, path)? else {
        return Ok(None);
    };
    match kind {
        RecordKind::Scalar => session.buffer_mut()?.erase(path.scalar_key()),
        RecordKind::Object | RecordKind::Array => {
            let (lo, hi) = path.subtree_range(kind);
            session.buffer_mut()?.erase_range(lo, hi);
        }
    }
    Ok(Some(kind))
}

/// The assignment protocol: validate, purge the old subtree, then write
/// the value, deep-copying containers child by child.
fn write_child<S: Store>(session: &mut Session<S>, child: &Path, value: &Value) -> Result<()> {
    session.check_writable()?;
    value.validate()?;
    purge(session, child)?;
    write_value(session, child, value)
}

fn write_value<S: Store>(session: &mut Session<S>, path: &Path, value: &Value) -> Result<()> {
    match value {
        Value::Object(entries) => {
            session.buffer_mut()?.write(path.object_key(), Vec::new());
            for (key, child) in entries {
                write_value(session, &path.child_key(key), child)?;
            }
        }
        Value::Array(items) => {
            write_len(session, path, items.len())?;
            for (index, child) in items.iter().enumerate() {
                write_value(session, &path.child_index(index), child)?;
            }
        }
        scalar => {
            session
                .buffer_mut()?
                .write(path.scalar_key(), scalar.encode_scalar());
        }
    }
    Ok(())
}

/// Moves the array element at index `from` to index `to` by materializing
/// it and rewriting it over the destination.
fn shift<S: Store>(session: &mut Session<S>, path: &Path, from: usize, to: usize) -> Result<()> {
    let moved = read_value(session, &path.child_index(from))?
        .ok_or_else(|| Error::Corrupt(format!("array {path} is missing element {from}")))?;
    purge(session, &path.child_index(to))?;
    write_value(session, &path.child_index(to), &moved)
}

/// Materializes the value at `path`, if any, recovering nested structure
/// through child scans and direct index reads.
pub(crate) fn read_value<S: Store>(session: &mut Session<S>, path: &Path) -> Result<Option<Value>> {
    let Some(kind) = probe(session, path)? else {
        return Ok(None);
    };
    let value = match kind {
        RecordKind::Scalar => {
            let payload = session
                .buffer()?
                .read(&path.scalar_key())?
                .ok_or_else(|| Error::Corrupt(format!("scalar record at {path} vanished")))?;
            Value::decode_scalar(&payload)?
        }
        RecordKind::Object => {
            let mut entries = BTreeMap::new();
            for step in child_steps(session, path)? {
                let Step::Key(key) = step else {
                    return errcorrupt!("array step {step} under object {path}");
                };
                let child = read_value(session, &path.child_key(&key))?
                    .ok_or_else(|| Error::Corrupt(format!("missing child {key:?} under {path}")))?;
                entries.insert(key, child);
            }
            Value::Object(entries)
        }
        RecordKind::Array => {
            let len = live_len(session, path)?;
            let mut items = Vec::with_capacity(len);
            for index in 0..len {
                let child = read_value(session, &path.child_index(index))?
                    .ok_or_else(|| Error::Corrupt(format!("array {path} is missing element {index}")))?;
                items.push(child);
            }
            Value::Array(items)
        }
    };
    Ok(Some(value))
}

/// The node at `path`, if any: scalars decoded from their record, and
/// containers as fresh views sharing the session.
pub(crate) fn node_at<S: Store>(
    session: &mut Session<S>,
    handle: &Arc<Mutex<Session<S>>>,
    path: &Path,
) -> Result<Option<Node<S>>> {
    let Some(kind) = probe(session, path)? else {
        return Ok(None);
    };
    let payload = session
        .buffer()?
        .read(&path.key(kind))?
        .ok_or_else(|| Error::Corrupt(format!("record at {path} vanished")))?;
    Ok(Some(node_from(kind, &payload, handle, path.clone())?))
}

fn node_from<S: Store>(
    kind: RecordKind,
    payload: &[u8],
    handle: &Arc<Mutex<Session<S>>>,
    path: Path,
) -> Result<Node<S>> {
    Ok(match kind {
        RecordKind::Scalar => Node::Scalar(Value::decode_scalar(payload)?),
        RecordKind::Object => Node::Object(Object::new(handle.clone(), path)),
        RecordKind::Array => Node::Array(Array::new(handle.clone(), path)),
    })
}

/// The direct children of the object at `path`, by seeking past each
/// child's subtree in turn.
fn child_steps<S: Store>(session: &mut Session<S>, path: &Path) -> Result<Vec<Step>> {
    let (mut lo, hi) = path.children_range(RecordKind::Object);
    let mut steps = Vec::new();
    while let Some(child) = next_child(session, path, &lo, &hi)? {
        steps.push(child.step);
        lo = child.next_lo;
    }
    Ok(steps)
}

/// The first direct child whose records lie in `[lo, hi)`. The child's own
/// record sorts before its descendants, so the first scanned record is the
/// child itself; a deeper key surfacing first means its parent marker is
/// missing.
fn next_child<S: Store>(
    session: &mut Session<S>,
    parent: &Path,
    lo: &[u8],
    hi: &[u8],
) -> Result<Option<ChildRecord>> {
    let prefix_len = parent.encode().len();
    let buffer = session.buffer()?;
    let Some(entry) = buffer.scan(lo, hi).next() else {
        return Ok(None);
    };
    let (key, payload) = entry?;
    let (step, used) = path::decode_step(&key[prefix_len..])?;
    if key.len() != prefix_len + used + 1 {
        return errcorrupt!(
            "orphan record {} has no parent marker",
            format::Raw::bytes(&key)
        );
    }
    let kind = RecordKind::from_suffix(key[key.len() - 1]).ok_or_else(|| {
        Error::Corrupt(format!("unknown kind suffix in key {}", format::Raw::bytes(&key)))
    })?;
    let next_lo = path::prefix_end(&key[..prefix_len + used]);
    Ok(Some(ChildRecord { step, kind, payload, next_lo }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::value::Number;

    fn object(entries: &[(&str, Value)]) -> Value {
        Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_object_set_get_contains() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        assert!(root.is_empty().unwrap());

        root.set("name", "jot").unwrap();
        root.set("count", 3i64).unwrap();
        root.set("none", ()).unwrap();

        assert_eq!(root.len().unwrap(), 3);
        assert!(root.contains("name").unwrap());
        assert!(!root.contains("missing").unwrap());
        assert_eq!(root.get("name").unwrap().into_scalar().unwrap(), Value::from("jot"));
        assert_eq!(root.get_value("none").unwrap(), Value::Null);
        assert!(matches!(root.get("missing"), Err(Error::MissingKey(key)) if key == "missing"));
    }

    #[test]
    fn test_reassignment_replaces_value() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("key", 1i64).unwrap();
        root.set("key", 2i64).unwrap();
        root.set("keycard", "card").unwrap();
        assert_eq!(root.get_value("key").unwrap(), Value::from(2i64));
        assert_eq!(root.get_value("keycard").unwrap(), Value::from("card"));
    }

    #[test]
    fn test_nested_views_write_through() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[])).unwrap();
        let a = root.get("a").unwrap().into_object().unwrap();
        a.set("b", 4i64).unwrap();
        a.set("b", true).unwrap();
        assert_eq!(a.get_value("b").unwrap(), Value::Bool(true));
        assert_eq!(
            root.get_value("a").unwrap(),
            object(&[("b", Value::Bool(true))])
        );
    }

    #[test]
    fn test_delete_removes_whole_subtree() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[("b", object(&[("c", Value::from(1i64))]))]))
            .unwrap();
        root.set("other", 2i64).unwrap();

        root.delete("a").unwrap();
        assert!(!root.contains("a").unwrap());
        assert_eq!(root.keys().unwrap(), vec!["other"]);
        assert!(matches!(root.delete("a"), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_view_survives_sibling_mutations() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[("x", Value::from(1i64))])).unwrap();
        let a = root.get("a").unwrap().into_object().unwrap();

        root.set("b", 2i64).unwrap();
        root.delete("b").unwrap();
        assert_eq!(a.get_value("x").unwrap(), Value::from(1i64));
    }

    #[test]
    fn test_stale_view_after_delete() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[("x", Value::from(1i64))])).unwrap();
        let a = root.get("a").unwrap().into_object().unwrap();

        root.delete("a").unwrap();
        assert!(matches!(a.len(), Err(Error::Stale(_))));
        assert!(matches!(a.get("x"), Err(Error::Stale(_))));
        assert!(matches!(a.set("x", 2i64), Err(Error::Stale(_))));
    }

    #[test]
    fn test_stale_view_after_replacement() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[])).unwrap();
        let a = root.get("a").unwrap().into_object().unwrap();

        // Replacing the object with a scalar leaves the old view stale.
        root.set("a", 1i64).unwrap();
        assert!(matches!(a.len(), Err(Error::Stale(_))));

        // An array view over a replaced path is stale too.
        root.set("xs", Value::Array(Vec::new())).unwrap();
        let xs = root.get("xs").unwrap().into_array().unwrap();
        root.set("xs", object(&[])).unwrap();
        assert!(matches!(xs.len(), Err(Error::Stale(_))));
    }

    #[test]
    fn test_assignment_deep_copies() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[("n", Value::from(1i64))])).unwrap();
        let a = root.get("a").unwrap().into_object().unwrap();

        root.set("b", a.to_value().unwrap()).unwrap();
        a.set("n", 2i64).unwrap();

        assert_eq!(root.get_value("b").unwrap(), object(&[("n", Value::from(1i64))]));
        assert_eq!(root.get_value("a").unwrap(), object(&[("n", Value::from(2i64))]));
    }

    #[test]
    fn test_array_set_bounds() {
        let db = Db::memory();
        let root = db.root_array().unwrap();
        root.push(1i64).unwrap();
        root.push(2i64).unwrap();

        root.set(0, 10i64).unwrap();
        assert_eq!(root.get_value(0).unwrap(), Value::from(10i64));

        // Setting at the length appends; past it fails.
        root.set(2, 3i64).unwrap();
        assert_eq!(root.len().unwrap(), 3);
        assert_eq!(root.set(5, 4i64), Err(Error::OutOfRange(5)));
        assert!(matches!(root.get(7), Err(Error::OutOfRange(7))));
        assert!(!root.contains(3).unwrap());
        assert!(root.contains(2).unwrap());
    }

    #[test]
    fn test_array_element_replacement_purges_subtree() {
        let db = Db::memory();
        let root = db.root_array().unwrap();
        root.push(object(&[("deep", Value::from(1i64))])).unwrap();
        root.set(0, 5i64).unwrap();
        assert_eq!(
            db.root().unwrap().to_value().unwrap(),
            Value::Array(vec![Value::from(5i64)])
        );
    }

    #[test]
    fn test_array_delete_shifts_tail_down() {
        let db = Db::memory();
        let root = db.root_array().unwrap();
        for value in [0i64, 1, 2] {
            root.push(value).unwrap();
        }
        root.delete(1).unwrap();
        assert_eq!(root.len().unwrap(), 2);
        assert_eq!(root.get_value(0).unwrap(), Value::from(0i64));
        assert_eq!(root.get_value(1).unwrap(), Value::from(2i64));
        assert_eq!(root.delete(2), Err(Error::OutOfRange(2)));
    }

    #[test]
    fn test_array_pop() {
        let db = Db::memory();
        let root = db.root_array().unwrap();
        root.push(17i64).unwrap();
        assert_eq!(root.pop().unwrap(), Value::from(17i64));
        assert!(root.is_empty().unwrap());
        assert_eq!(root.pop(), Err(Error::OutOfRange(0)));
    }

    #[test]
    fn test_array_iterates_in_numeric_order_past_ten() {
        let db = Db::memory();
        let root = db.root_array().unwrap();
        // Two digits: raw byte order would put [10] before [2].
        for value in 0i64..12 {
            root.push(value).unwrap();
        }
        let values: Vec<Value> = root
            .iter()
            .map(|node| node.unwrap().to_value().unwrap())
            .collect();
        let expected: Vec<Value> = (0i64..12).map(Value::from).collect();
        assert_eq!(values, expected);
        assert_eq!(
            db.root().unwrap().to_value().unwrap(),
            Value::Array(expected)
        );
    }

    #[test]
    fn test_empty_containers_are_not_missing() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("obj", object(&[])).unwrap();
        root.set("arr", Value::Array(Vec::new())).unwrap();

        assert!(root.contains("obj").unwrap());
        assert!(root.get("obj").unwrap().into_object().unwrap().is_empty().unwrap());
        assert!(root.get("arr").unwrap().into_array().unwrap().is_empty().unwrap());
        assert_eq!(
            root.to_value().unwrap(),
            object(&[("arr", Value::Array(Vec::new())), ("obj", object(&[]))])
        );
    }

    #[test]
    fn test_node_accessors_mismatch() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("n", 1i64).unwrap();
        root.set("o", object(&[])).unwrap();

        assert!(matches!(
            root.get("n").unwrap().into_object(),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            root.get("o").unwrap().into_array(),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            root.get("o").unwrap().into_scalar(),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        assert!(matches!(
            root.set("nan", f64::NAN),
            Err(Error::InvalidValue(_))
        ));
        let nested = Value::Array(vec![Value::Number(Number::Float64(f64::INFINITY))]);
        assert!(matches!(root.set("inf", nested), Err(Error::InvalidValue(_))));
        // Nothing was written.
        assert!(root.is_empty().unwrap());
    }

    #[test]
    fn test_nested_array_of_objects() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set(
            "rows",
            Value::Array(vec![
                object(&[("id", Value::from(1i64))]),
                object(&[("id", Value::from(2i64))]),
            ]),
        )
        .unwrap();

        let rows = root.get("rows").unwrap().into_array().unwrap();
        let second = rows.get(1).unwrap().into_object().unwrap();
        second.set("id", 20i64).unwrap();
        assert_eq!(
            root.get_value("rows").unwrap(),
            Value::Array(vec![
                object(&[("id", Value::from(1i64))]),
                object(&[("id", Value::from(20i64))]),
            ])
        );
    }

    #[test]
    fn test_object_iter_skips_grandchildren() {
        let db = Db::memory();
        let root = db.root_object().unwrap();
        root.set("a", object(&[("deep", object(&[("deeper", Value::from(1i64))]))]))
            .unwrap();
        root.set("b", 2i64).unwrap();

        let keys: Vec<String> = root.iter().map(|entry| entry.unwrap().0).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
