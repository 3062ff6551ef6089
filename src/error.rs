use std::fmt::Display;

/// jotdb errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The store handle has been closed.
    Closed,
    /// A stored record failed to decode, or the store's structural
    /// invariants do not hold. Writes are refused until the store is
    /// reopened.
    Corrupt(String),
    /// An IO error, including failures surfaced by the key-value engine.
    IO(String),
    /// A value outside the JSON algebra was assigned, e.g. a non-finite
    /// number.
    InvalidValue(String),
    /// The requested object key does not exist.
    MissingKey(String),
    /// An array index is past the end of the array.
    OutOfRange(usize),
    /// A write was attempted on a store made read-only by a corruption
    /// error.
    ReadOnly,
    /// The subtree this view pointed at was deleted or replaced by another
    /// operation on the same store.
    Stale(String),
    /// An operation found a container of the wrong kind, e.g. an array
    /// where an object was expected.
    TypeMismatch(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Closed => write!(f, "store is closed"),
            Error::Corrupt(msg) => write!(f, "corrupt store: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            Error::MissingKey(key) => write!(f, "missing key {key:?}"),
            Error::OutOfRange(index) => write!(f, "index {index} out of range"),
            Error::ReadOnly => write!(f, "store is read-only after a corruption error"),
            Error::Stale(path) => write!(f, "stale view: {path} no longer exists"),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
        }
    }
}

/// Constructs an Error::Corrupt for the given format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidValue for the given format string.
#[macro_export]
macro_rules! errvalue {
    ($($args:tt)*) => { $crate::error::Error::InvalidValue(format!($($args)*)).into() };
}

/// A jotdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
