//! Rosetta Core - Entry model for collaborative deobfuscation
//!
//! This crate defines the value types every other Rosetta crate speaks:
//! structural [`Entry`] identifiers for obfuscated symbols, the
//! [`EntryMapping`] payload attached to them, and the legality rules for
//! proposed names and documentation.
//!
//! # Example
//!
//! ```
//! use rosetta_core::{Entry, EntryMapping};
//!
//! let class = Entry::class("a/b").unwrap();
//! let method = class.method("c", "(I)V").unwrap();
//!
//! assert_eq!(method.parent(), Some(&class));
//! assert!(EntryMapping::named("getCount").name.is_some());
//! ```

mod entry;
mod error;
pub mod identifier;
mod mapping;

pub use entry::{split_package, Entry, EntryKind};
pub use error::{CoreError, Result};
pub use identifier::IdentifierError;
pub use mapping::{AccessModifier, EntryMapping};
