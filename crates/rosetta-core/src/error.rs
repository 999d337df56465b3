//! Error types for entry construction and identifier checks.

use crate::entry::EntryKind;
use thiserror::Error;

/// Errors raised while building an [`Entry`](crate::Entry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("entry name must not be empty")]
    EmptyName,

    #[error("{child} entries cannot be nested under {}", describe_parent(.parent))]
    InvalidParent {
        child: EntryKind,
        parent: Option<EntryKind>,
    },

    #[error("{kind} entries require a descriptor")]
    MissingDescriptor { kind: EntryKind },

    #[error("{kind} entries do not carry a descriptor")]
    UnexpectedDescriptor { kind: EntryKind },

    #[error("malformed method descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("class names use '/' as the package separator, got: {0}")]
    DottedClassName(String),
}

fn describe_parent(parent: &Option<EntryKind>) -> String {
    match parent {
        Some(kind) => format!("a {}", kind),
        None => "the root".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
