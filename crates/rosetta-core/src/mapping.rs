//! The payload attached to an entry in the mapping tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access modifier override applied when the mapped source is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessModifier {
    /// Keep whatever the class file says.
    #[default]
    Unchanged,
    Public,
    Protected,
    Private,
}

impl fmt::Display for AccessModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unchanged => "unchanged",
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
        };
        write!(f, "{}", s)
    }
}

/// Deobfuscated name, documentation and access override for one entry.
///
/// A mapping with no name is a documented but not yet renamed symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryMapping {
    /// The human-chosen name, if the entry has been renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Documentation text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,

    #[serde(default)]
    pub access: AccessModifier,
}

impl EntryMapping {
    /// A mapping that only renames.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A mapping that only documents.
    pub fn documented(docs: impl Into<String>) -> Self {
        Self {
            docs: Some(docs.into()),
            ..Self::default()
        }
    }

    pub fn with_docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = Some(docs.into());
        self
    }

    pub fn with_access(mut self, access: AccessModifier) -> Self {
        self.access = access;
        self
    }

    /// Returns whether this mapping carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.docs.is_none() && self.access == AccessModifier::Unchanged
    }

    /// The display name for an entry whose obfuscated name is `fallback`.
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_empty() {
        assert!(EntryMapping::default().is_empty());
        assert!(!EntryMapping::named("x").is_empty());
        assert!(!EntryMapping::documented("doc").is_empty());
        assert!(!EntryMapping::default()
            .with_access(AccessModifier::Public)
            .is_empty());
    }

    #[test]
    fn test_name_or() {
        assert_eq!(EntryMapping::named("Foo").name_or("a"), "Foo");
        assert_eq!(EntryMapping::documented("d").name_or("a"), "a");
    }

    #[test]
    fn test_json_defaults() {
        let mapping: EntryMapping = serde_json::from_str(r#"{"name":"Foo"}"#).unwrap();
        assert_eq!(mapping, EntryMapping::named("Foo"));
        assert_eq!(mapping.access, AccessModifier::Unchanged);
    }
}
