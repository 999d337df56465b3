//! Rosetta Tree - versioned mapping storage
//!
//! This crate holds the authoritative Entry → EntryMapping tree together
//! with everything that reads it: the translator that renders deobfuscated
//! names, the validator that decides whether a rename is legal, and the
//! change log that records every accepted mutation in order.
//!
//! # Architecture
//!
//! The tree is an arena (petgraph `StableDiGraph`) with extra indexes for:
//! - Direct lookup by structural Entry equality
//! - Name-ordered children per parent
//! - Per-entry last-changed versions for optimistic concurrency
//!
//! # Example
//!
//! ```
//! use rosetta_core::{Entry, EntryMapping};
//! use rosetta_tree::{MappingTree, Translator};
//!
//! let mut tree = MappingTree::new();
//! let class = Entry::class("a").unwrap();
//! let field = class.field("b", "I").unwrap();
//!
//! tree.insert_or_update(class, EntryMapping::named("net/example/Counter"));
//! tree.insert_or_update(field.clone(), EntryMapping::named("count"));
//!
//! assert_eq!(Translator::new(&tree).translate(&field), "net/example/Counter.count");
//! ```

mod change;
mod error;
mod index;
mod prune;
mod translator;
mod tree;
mod validator;

pub use change::{Change, ChangeLog, MappingEdit};
pub use error::{Result, TreeError};
pub use index::{ClassIndex, IndexSnapshot, IndexedEntry, Partition, StaticIndex};
pub use prune::{drop_invalid, DropReason, Pruned};
pub use translator::Translator;
pub use tree::{MappingTree, NodeId, Removal, SnapshotEntry};
pub use validator::{Rejection, RuleId, Severity, ValidationPolicy, Validator, Verdict};
