//! jotdb is a single-process, single-writer, persistent object-graph store
//! for JSON values. A nested graph is flattened into an ordered key-value
//! engine through a path codec whose byte order keeps every subtree in one
//! contiguous key range; mutations buffer in memory and commit atomically.
//!
//! ```no_run
//! use jotdb::{Db, Value};
//!
//! fn main() -> jotdb::Result<()> {
//!     let db = Db::open("notes.jot")?;
//!     let root = db.root_object()?;
//!     root.set("title", "shopping")?;
//!     root.set("items", Value::Array(Vec::new()))?;
//!     root.get("items")?.into_array()?.push("bread")?;
//!     db.commit()?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod db;
pub mod error;
pub mod flock;
pub mod format;
pub mod path;
pub mod store;
pub mod value;
pub mod view;

pub use config::Options;
pub use db::Db;
pub use error::{Error, Result};
pub use value::{Number, Value};
pub use view::{Array, Node, Object};
