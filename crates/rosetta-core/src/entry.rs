//! Structural identifiers for obfuscated symbols.
//!
//! An [`Entry`] names one symbol by value: its kind, obfuscated name,
//! descriptor and owning parent. Two entries built from the same parts are
//! the same symbol, so entries can be used directly as map keys.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The kind of symbol an entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A top-level or inner class.
    Class,

    /// A field declared in a class.
    Field,

    /// A method or constructor declared in a class.
    Method,

    /// A method parameter, identified by its local slot.
    Parameter { index: u16 },

    /// A local variable, identified by its local slot.
    LocalVariable { index: u16 },
}

impl EntryKind {
    /// Returns whether an entry of this kind may be nested under `parent`.
    pub fn accepts_parent(&self, parent: Option<EntryKind>) -> bool {
        match (self, parent) {
            (EntryKind::Class, None | Some(EntryKind::Class)) => true,
            (EntryKind::Field | EntryKind::Method, Some(EntryKind::Class)) => true,
            (
                EntryKind::Parameter { .. } | EntryKind::LocalVariable { .. },
                Some(EntryKind::Method),
            ) => true,
            _ => false,
        }
    }

    /// Returns whether this kind lives in a method's local variable table.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EntryKind::Parameter { .. } | EntryKind::LocalVariable { .. }
        )
    }

    /// The separator placed between a parent's name and a child of this kind.
    pub fn separator(&self) -> char {
        match self {
            EntryKind::Class => '$',
            _ => '.',
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Class => "class",
            Self::Field => "field",
            Self::Method => "method",
            Self::Parameter { .. } => "parameter",
            Self::LocalVariable { .. } => "local_variable",
        };
        write!(f, "{}", s)
    }
}

/// A structural identifier for one obfuscated symbol.
///
/// Parents are shared through `Arc`, so cloning a deeply nested entry is
/// cheap. Equality, hashing and ordering all look at the full chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawEntry", into = "RawEntry")]
pub struct Entry {
    kind: EntryKind,
    name: String,
    descriptor: Option<String>,
    parent: Option<Arc<Entry>>,
}

/// Unchecked wire form of an entry. Validated on the way in.
#[derive(Serialize, Deserialize)]
struct RawEntry {
    kind: EntryKind,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Box<Entry>>,
}

impl TryFrom<RawEntry> for Entry {
    type Error = CoreError;

    fn try_from(raw: RawEntry) -> Result<Self> {
        Entry::new(raw.kind, raw.name, raw.descriptor, raw.parent.map(|p| *p))
    }
}

impl From<Entry> for RawEntry {
    fn from(entry: Entry) -> Self {
        RawEntry {
            kind: entry.kind,
            name: entry.name,
            descriptor: entry.descriptor,
            parent: entry.parent.map(|p| Box::new((*p).clone())),
        }
    }
}

impl Entry {
    /// Builds an entry, checking the nesting and descriptor rules.
    pub fn new(
        kind: EntryKind,
        name: impl Into<String>,
        descriptor: Option<String>,
        parent: Option<Entry>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::EmptyName);
        }

        let parent_kind = parent.as_ref().map(|p| p.kind);
        if !kind.accepts_parent(parent_kind) {
            return Err(CoreError::InvalidParent {
                child: kind,
                parent: parent_kind,
            });
        }

        match kind {
            EntryKind::Class => {
                if descriptor.is_some() {
                    return Err(CoreError::UnexpectedDescriptor { kind });
                }
                if name.contains('.') {
                    return Err(CoreError::DottedClassName(name));
                }
            }
            EntryKind::Field => {
                if descriptor.as_deref().map_or(true, str::is_empty) {
                    return Err(CoreError::MissingDescriptor { kind });
                }
            }
            EntryKind::Method => match descriptor.as_deref() {
                None | Some("") => return Err(CoreError::MissingDescriptor { kind }),
                Some(desc) if !desc.starts_with('(') || !desc.contains(')') => {
                    return Err(CoreError::MalformedDescriptor(desc.to_string()));
                }
                Some(_) => {}
            },
            EntryKind::Parameter { .. } | EntryKind::LocalVariable { .. } => {}
        }

        Ok(Self {
            kind,
            name,
            descriptor,
            parent: parent.map(Arc::new),
        })
    }

    /// A top-level class, named with its `/`-separated package path.
    pub fn class(name: impl Into<String>) -> Result<Self> {
        Self::new(EntryKind::Class, name, None, None)
    }

    /// Parses a binary class name such as `a/b$c` into nested class entries.
    pub fn parse_class(binary_name: &str) -> Result<Self> {
        let mut parts = binary_name.split('$');
        let mut entry = Self::class(parts.next().unwrap_or_default())?;
        for inner in parts {
            entry = entry.inner_class(inner)?;
        }
        Ok(entry)
    }

    /// A class nested inside this class.
    pub fn inner_class(&self, name: impl Into<String>) -> Result<Self> {
        Self::new(EntryKind::Class, name, None, Some(self.clone()))
    }

    /// A field of this class.
    pub fn field(&self, name: impl Into<String>, descriptor: impl Into<String>) -> Result<Self> {
        Self::new(
            EntryKind::Field,
            name,
            Some(descriptor.into()),
            Some(self.clone()),
        )
    }

    /// A method of this class.
    pub fn method(&self, name: impl Into<String>, descriptor: impl Into<String>) -> Result<Self> {
        Self::new(
            EntryKind::Method,
            name,
            Some(descriptor.into()),
            Some(self.clone()),
        )
    }

    /// A parameter of this method.
    pub fn parameter(&self, index: u16, name: impl Into<String>) -> Result<Self> {
        Self::new(
            EntryKind::Parameter { index },
            name,
            None,
            Some(self.clone()),
        )
    }

    /// A local variable of this method.
    pub fn local(&self, index: u16, name: impl Into<String>) -> Result<Self> {
        Self::new(
            EntryKind::LocalVariable { index },
            name,
            None,
            Some(self.clone()),
        )
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The obfuscated name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> Option<&str> {
        self.descriptor.as_deref()
    }

    pub fn parent(&self) -> Option<&Entry> {
        self.parent.as_deref()
    }

    pub fn is_class(&self) -> bool {
        self.kind == EntryKind::Class
    }

    /// Returns the chain from the outermost ancestor down to this entry.
    pub fn ancestry(&self) -> Vec<&Entry> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(entry) = current {
            chain.push(entry);
            current = entry.parent();
        }
        chain.reverse();
        chain
    }

    /// Number of ancestors above this entry.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(entry) = current {
            depth += 1;
            current = entry.parent();
        }
        depth
    }

    /// The nearest class at or above this entry.
    pub fn containing_class(&self) -> Option<&Entry> {
        self.ancestry().into_iter().rev().find(|e| e.is_class())
    }

    /// The top-level class this entry belongs to.
    pub fn outermost_class(&self) -> &Entry {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Returns whether a deobfuscated name may ever be attached.
    ///
    /// Constructors, static initializers and array classes keep the names
    /// the runtime gives them.
    pub fn is_renamable(&self) -> bool {
        match self.kind {
            EntryKind::Method => !self.name.starts_with('<'),
            EntryKind::Class => !self.name.starts_with('['),
            _ => true,
        }
    }

    /// Returns whether this entry and `other` would clash if given the same
    /// name under the same parent.
    pub fn can_conflict_with(&self, other: &Entry) -> bool {
        if self.parent != other.parent {
            return false;
        }
        match (self.kind, other.kind) {
            (EntryKind::Class, EntryKind::Class) => true,
            (EntryKind::Field, EntryKind::Field) => true,
            (EntryKind::Method, EntryKind::Method) => {
                parameter_list(self.descriptor()) == parameter_list(other.descriptor())
            }
            (a, b) => a.is_local() && b.is_local(),
        }
    }
}

/// The `(...)` part of a method descriptor; overloads differ only here.
fn parameter_list(descriptor: Option<&str>) -> Option<&str> {
    let desc = descriptor?;
    let end = desc.find(')')?;
    Some(&desc[..=end])
}

/// Splits a `/`-separated class name into its package and simple name.
pub fn split_package(name: &str) -> (Option<&str>, &str) {
    match name.rfind('/') {
        Some(pos) if pos > 0 => (Some(&name[..pos]), &name[pos + 1..]),
        _ => (None, name),
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{}{}", parent, self.kind.separator())?;
        }
        match self.kind {
            EntryKind::Parameter { index } | EntryKind::LocalVariable { index } => {
                write!(f, "{}#{}", self.name, index)
            }
            EntryKind::Method => write!(f, "{}{}", self.name, self.descriptor().unwrap_or("")),
            _ => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Entry::class("a/b").unwrap().method("c", "(I)V").unwrap();
        let b = Entry::class("a/b").unwrap().method("c", "(I)V").unwrap();
        assert_eq!(a, b);

        let other = Entry::class("a/b").unwrap().method("c", "(J)V").unwrap();
        assert_ne!(a, other);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_parent_rules() {
        let class = Entry::class("a").unwrap();
        let field = class.field("f", "I").unwrap();
        let method = class.method("m", "()V").unwrap();

        assert!(method.parameter(1, "p").is_ok());
        assert!(matches!(
            field.parameter(0, "p"),
            Err(CoreError::InvalidParent { .. })
        ));
        assert!(matches!(
            method.inner_class("x"),
            Err(CoreError::InvalidParent { .. })
        ));
        assert!(matches!(
            Entry::new(EntryKind::Field, "f", Some("I".into()), None),
            Err(CoreError::InvalidParent { .. })
        ));
    }

    #[test]
    fn test_descriptor_rules() {
        let class = Entry::class("a").unwrap();
        assert_eq!(
            class.field("f", ""),
            Err(CoreError::MissingDescriptor {
                kind: EntryKind::Field
            })
        );
        assert!(matches!(
            class.method("m", "V"),
            Err(CoreError::MalformedDescriptor(_))
        ));
        assert!(matches!(
            Entry::class("a.b"),
            Err(CoreError::DottedClassName(_))
        ));
        assert_eq!(Entry::class(""), Err(CoreError::EmptyName));
    }

    #[test]
    fn test_ancestry() {
        let class = Entry::class("a").unwrap();
        let inner = class.inner_class("b").unwrap();
        let method = inner.method("m", "()V").unwrap();
        let param = method.parameter(0, "p").unwrap();

        let names: Vec<&str> = param.ancestry().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["a", "b", "m", "p"]);
        assert_eq!(param.depth(), 3);
        assert_eq!(param.containing_class(), Some(&inner));
        assert_eq!(param.outermost_class(), &class);
    }

    #[test]
    fn test_can_conflict_with() {
        let class = Entry::class("a").unwrap();
        let m1 = class.method("m", "(I)V").unwrap();
        let m2 = class.method("n", "(I)I").unwrap();
        let m3 = class.method("o", "(J)V").unwrap();
        let f = class.field("f", "I").unwrap();

        assert!(m1.can_conflict_with(&m2));
        assert!(!m1.can_conflict_with(&m3));
        assert!(!m1.can_conflict_with(&f));

        let p = m1.parameter(1, "a").unwrap();
        let l = m1.local(2, "b").unwrap();
        assert!(p.can_conflict_with(&l));
    }

    #[test]
    fn test_renamable() {
        let class = Entry::class("a").unwrap();
        assert!(!class.method("<init>", "()V").unwrap().is_renamable());
        assert!(class.method("b", "()V").unwrap().is_renamable());
        assert!(!Entry::class("[La;").unwrap().is_renamable());
    }

    #[test]
    fn test_parse_class() {
        let parsed = Entry::parse_class("a/b$c$d").unwrap();
        assert_eq!(parsed.name(), "d");
        assert_eq!(parsed.depth(), 2);
        assert_eq!(parsed.outermost_class().name(), "a/b");
        assert!(Entry::parse_class("a$").is_err());
    }

    #[test]
    fn test_split_package() {
        assert_eq!(split_package("net/foo/Bar"), (Some("net/foo"), "Bar"));
        assert_eq!(split_package("Bar"), (None, "Bar"));
    }

    #[test]
    fn test_serde_rejects_bad_nesting() {
        let method = Entry::class("a").unwrap().method("m", "()V").unwrap();
        let json = serde_json::to_string(&method).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, method);

        let bad = r#"{"kind":"method","name":"m","descriptor":"()V"}"#;
        assert!(serde_json::from_str::<Entry>(bad).is_err());
    }

    #[test]
    fn test_display() {
        let method = Entry::class("a/B").unwrap().method("m", "(I)V").unwrap();
        assert_eq!(method.to_string(), "a/B.m(I)V");
        assert_eq!(method.parameter(1, "x").unwrap().to_string(), "a/B.m(I)V.x#1");
    }
}
