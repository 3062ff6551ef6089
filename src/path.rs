//! The path codec: maps JSON paths onto byte-ordered keys.
//!
//! A path is encoded step by step: object step `k` becomes `.` followed by
//! the JSON-quoted key, array step `i` becomes `[i]`. Every stored record's
//! key is a path's *descent prefix* plus a one-byte kind suffix:
//!
//! - `="` terminated keys hold scalar payloads,
//! - `.` terminated keys mark objects (empty payload),
//! - `[` terminated keys mark arrays (payload is the decimal length).
//!
//! The scalar value of `d["a"][0]` is therefore keyed `."a"[0]=`. A
//! container's marker is a strict prefix of every descendant key, so the
//! marker sorts first and the whole subtree is one contiguous key range.

use std::fmt::Display;

use crate::errcorrupt;
use crate::error::Result;

/// Kind suffix for scalar records.
pub const SCALAR_SUFFIX: u8 = b'=';
/// Kind suffix for object container markers.
pub const OBJECT_SUFFIX: u8 = b'.';
/// Kind suffix for array container markers.
pub const ARRAY_SUFFIX: u8 = b'[';

/// One step of a path: an object key or an array index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

impl Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Step::Key(key) => write!(f, ".{key:?}"),
            Step::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// The kind of record stored at a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Scalar,
    Object,
    Array,
}

impl RecordKind {
    pub fn suffix(self) -> u8 {
        match self {
            RecordKind::Scalar => SCALAR_SUFFIX,
            RecordKind::Object => OBJECT_SUFFIX,
            RecordKind::Array => ARRAY_SUFFIX,
        }
    }

    pub fn from_suffix(byte: u8) -> Option<Self> {
        match byte {
            SCALAR_SUFFIX => Some(RecordKind::Scalar),
            OBJECT_SUFFIX => Some(RecordKind::Object),
            ARRAY_SUFFIX => Some(RecordKind::Array),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Scalar => "scalar",
            RecordKind::Object => "object",
            RecordKind::Array => "array",
        }
    }
}

/// A path from the root: a sequence of steps. The empty path is the root.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Path(Vec<Step>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, step: Step) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Path(steps)
    }

    pub fn child_key(&self, key: &str) -> Self {
        self.child(Step::Key(key.to_string()))
    }

    pub fn child_index(&self, index: usize) -> Self {
        self.child(Step::Index(index))
    }

    /// The descent prefix: the encoded path without a kind suffix. No
    /// record is stored under this key itself.
    pub fn encode(&self) -> Vec<u8> {
        let mut prefix = Vec::new();
        for step in &self.0 {
            encode_step(step, &mut prefix);
        }
        prefix
    }

    /// The key of this path's record of the given kind.
    pub fn key(&self, kind: RecordKind) -> Vec<u8> {
        let mut key = self.encode();
        key.push(kind.suffix());
        key
    }

    pub fn scalar_key(&self) -> Vec<u8> {
        self.key(RecordKind::Scalar)
    }

    pub fn object_key(&self) -> Vec<u8> {
        self.key(RecordKind::Object)
    }

    pub fn array_key(&self) -> Vec<u8> {
        self.key(RecordKind::Array)
    }

    /// The half-open key range holding this path's record of the given kind
    /// plus, for containers, every descendant record. Removing this range
    /// removes the subtree and its marker.
    pub fn subtree_range(&self, kind: RecordKind) -> (Vec<u8>, Vec<u8>) {
        let lo = self.key(kind);
        let hi = match kind {
            // A scalar has no descendants: the range is the single key.
            RecordKind::Scalar => {
                let mut hi = lo.clone();
                *hi.last_mut().expect("scalar key is never empty") += 1;
                hi
            }
            RecordKind::Object | RecordKind::Array => prefix_end(&lo),
        };
        (lo, hi)
    }

    /// The half-open key range holding exactly the descendant records of
    /// this container, excluding its own marker.
    ///
    /// Every descendant of an object starts with `."`, every descendant of
    /// an array with `[` and a digit, so the child ranges are derived by
    /// bounding those lead bytes.
    pub fn children_range(&self, kind: RecordKind) -> (Vec<u8>, Vec<u8>) {
        let prefix = self.encode();
        match kind {
            RecordKind::Scalar => (prefix.clone(), prefix),
            RecordKind::Object => {
                let mut lo = prefix.clone();
                lo.extend_from_slice(b".\"");
                let mut hi = prefix;
                hi.push(OBJECT_SUFFIX);
                hi.push(b'"' + 1);
                (lo, hi)
            }
            RecordKind::Array => {
                let mut lo = prefix.clone();
                lo.extend_from_slice(b"[0");
                let mut hi = prefix;
                hi.push(ARRAY_SUFFIX);
                hi.push(b'9' + 1);
                (lo, hi)
            }
        }
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, "(root)");
        }
        for step in &self.0 {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Appends the encoding of one step to `out`.
pub fn encode_step(step: &Step, out: &mut Vec<u8>) {
    match step {
        Step::Key(key) => {
            out.push(b'.');
            let quoted = serde_json::to_string(key).expect("string serialization should not fail");
            out.extend_from_slice(quoted.as_bytes());
        }
        Step::Index(index) => {
            out.push(b'[');
            out.extend_from_slice(index.to_string().as_bytes());
            out.push(b']');
        }
    }
}

/// Decodes the step at the start of `bytes`, returning it and the number of
/// bytes consumed. Used to peel direct children out of range scans.
pub fn decode_step(bytes: &[u8]) -> Result<(Step, usize)> {
    match bytes.first() {
        Some(&b'.') => {
            let end = quoted_end(bytes, 1)?;
            let key: String = serde_json::from_slice(&bytes[1..end])?;
            Ok((Step::Key(key), end))
        }
        Some(&b'[') => {
            let digits = bytes[1..].iter().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 || bytes.get(1 + digits) != Some(&b']') {
                return errcorrupt!("malformed array step in key {}", crate::format::Raw::bytes(bytes));
            }
            let text = std::str::from_utf8(&bytes[1..1 + digits])
                .expect("digits are valid utf-8");
            let index = text
                .parse()
                .map_err(|_| crate::error::Error::Corrupt(format!("array index {text} overflows")))?;
            Ok((Step::Index(index), digits + 2))
        }
        _ => errcorrupt!("malformed step in key {}", crate::format::Raw::bytes(bytes)),
    }
}

/// Decodes a full record key into its path and record kind.
pub fn decode_key(key: &[u8]) -> Result<(Path, RecordKind)> {
    let mut steps = Vec::new();
    let mut rest = key;
    loop {
        if rest.len() == 1 {
            match RecordKind::from_suffix(rest[0]) {
                Some(kind) => return Ok((Path(steps), kind)),
                None => break,
            }
        }
        if rest.is_empty() {
            break;
        }
        let (step, used) = decode_step(rest)?;
        steps.push(step);
        rest = &rest[used..];
    }
    errcorrupt!("key {} has no kind suffix", crate::format::Raw::bytes(key))
}

/// The end of the JSON-quoted string starting at `bytes[start]`, exclusive.
///
/// Quote and backslash bytes cannot occur inside multi-byte UTF-8
/// sequences, so a byte scan suffices.
fn quoted_end(bytes: &[u8], start: usize) -> Result<usize> {
    if bytes.get(start) != Some(&b'"') {
        return errcorrupt!("malformed object step in key {}", crate::format::Raw::bytes(bytes));
    }
    let mut escaped = false;
    for (offset, &byte) in bytes[start + 1..].iter().enumerate() {
        match byte {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Ok(start + offset + 2),
            _ => {}
        }
    }
    errcorrupt!("unterminated object step in key {}", crate::format::Raw::bytes(bytes))
}

/// The smallest key strictly greater than every key starting with `prefix`.
pub(crate) fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // Codec-produced prefixes always contain ASCII framing bytes.
    unreachable!("prefix has no incrementable byte")
}
