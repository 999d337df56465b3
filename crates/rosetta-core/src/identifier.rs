//! Legality checks for proposed names and documentation.

use crate::entry::{Entry, EntryKind};
use thiserror::Error;

/// Sequence that would close an embedded doc comment in rendered source.
pub const DOC_TERMINATOR: &str = "*/";

const RESERVED: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally", "float",
    "for", "goto", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "package", "private", "protected", "public", "return", "short", "static",
    "strictfp", "super", "switch", "synchronized", "this", "throw", "throws", "transient", "try",
    "void", "volatile", "while", "_",
];

/// Why a name or doc string was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("name must not be blank")]
    Blank,

    #[error("'{0}' is a reserved word")]
    Reserved(String),

    #[error("'{name}' has an illegal character '{ch}' at position {position}")]
    IllegalCharacter {
        name: String,
        ch: char,
        position: usize,
    },

    #[error("documentation must not contain '{}'", DOC_TERMINATOR)]
    DocTerminator,
}

/// Returns whether `name` is a reserved word.
pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

/// Checks a single identifier segment.
pub fn validate_identifier(name: &str) -> Result<(), IdentifierError> {
    if name.trim().is_empty() {
        return Err(IdentifierError::Blank);
    }
    if is_reserved(name) {
        return Err(IdentifierError::Reserved(name.to_string()));
    }

    for (i, ch) in name.chars().enumerate() {
        let legal = if i == 0 {
            is_identifier_start(ch)
        } else {
            is_identifier_part(ch)
        };
        if !legal {
            return Err(IdentifierError::IllegalCharacter {
                name: name.to_string(),
                ch,
                position: i + 1,
            });
        }
    }

    Ok(())
}

/// Checks a class name. Top-level names are package paths, each segment
/// validated; inner class names are a single identifier.
pub fn validate_class_name(name: &str, inner: bool) -> Result<(), IdentifierError> {
    if name.trim().is_empty() {
        return Err(IdentifierError::Blank);
    }
    if inner {
        return validate_identifier(name);
    }
    name.split('/').try_for_each(validate_identifier)
}

/// Checks a proposed name for `entry`, using the class rules for classes.
pub fn validate_name(entry: &Entry, name: &str) -> Result<(), IdentifierError> {
    match entry.kind() {
        EntryKind::Class => validate_class_name(name, entry.parent().is_some()),
        _ => validate_identifier(name),
    }
}

/// Checks documentation text.
pub fn validate_docs(docs: &str) -> Result<(), IdentifierError> {
    if docs.contains(DOC_TERMINATOR) {
        return Err(IdentifierError::DocTerminator);
    }
    Ok(())
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_identifier_part(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("fooBar").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        assert!(validate_identifier("$名前").is_ok());
        assert_eq!(validate_identifier("  "), Err(IdentifierError::Blank));
        assert_eq!(
            validate_identifier("class"),
            Err(IdentifierError::Reserved("class".into()))
        );
        assert_eq!(
            validate_identifier("1abc"),
            Err(IdentifierError::IllegalCharacter {
                name: "1abc".into(),
                ch: '1',
                position: 1
            })
        );
        assert!(matches!(
            validate_identifier("a-b"),
            Err(IdentifierError::IllegalCharacter { ch: '-', position: 2, .. })
        ));
    }

    #[test]
    fn test_validate_class_name() {
        assert!(validate_class_name("net/example/Foo", false).is_ok());
        assert!(validate_class_name("net/example/Foo", true).is_err());
        assert!(validate_class_name("net/int/Foo", false).is_err());
        assert!(validate_class_name("net//Foo", false).is_err());
        assert!(validate_class_name("Inner", true).is_ok());
    }

    #[test]
    fn test_validate_name_uses_entry_kind() {
        let class = Entry::class("a").unwrap();
        let inner = class.inner_class("b").unwrap();
        assert!(validate_name(&class, "pkg/Name").is_ok());
        assert!(validate_name(&inner, "pkg/Name").is_err());
        let field = class.field("c", "I").unwrap();
        assert!(validate_name(&field, "pkg/name").is_err());
    }

    #[test]
    fn test_validate_docs() {
        assert!(validate_docs("Returns the count.").is_ok());
        assert_eq!(
            validate_docs("sneaky */ code"),
            Err(IdentifierError::DocTerminator)
        );
    }
}
