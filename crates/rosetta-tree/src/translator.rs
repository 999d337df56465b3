//! Composes ancestor mappings into display names.

use crate::tree::MappingTree;
use rosetta_core::{split_package, Entry};

/// Read-only view that renders entries with their deobfuscated names.
///
/// Output depends only on the tree contents, so two trees at the same
/// version produce byte-identical names for the same entry.
#[derive(Clone, Copy)]
pub struct Translator<'a> {
    tree: &'a MappingTree,
}

impl<'a> Translator<'a> {
    pub fn new(tree: &'a MappingTree) -> Self {
        Self { tree }
    }

    /// The name shown for `entry` at its own level.
    pub fn leaf_name<'e>(&self, entry: &'e Entry) -> &'e str
    where
        'a: 'e,
    {
        self.tree
            .lookup(entry)
            .and_then(|m| m.name.as_deref())
            .unwrap_or(entry.name())
    }

    /// The fully qualified display name of `entry`.
    ///
    /// Each level contributes its mapped name, or its obfuscated name when
    /// unmapped, joined by `$` for nested classes and `.` for members.
    pub fn translate(&self, entry: &Entry) -> String {
        self.render(entry, None)
    }

    /// Like [`translate`](Self::translate), but with `entry`'s own level
    /// renamed to `leaf`.
    pub fn translate_as(&self, entry: &Entry, leaf: &str) -> String {
        self.render(entry, Some(leaf))
    }

    /// The package of the top-level class containing `entry`, as it
    /// currently translates.
    pub fn package_of(&self, entry: &Entry) -> Option<String> {
        let outer = entry.outermost_class();
        split_package(self.leaf_name(outer)).0.map(str::to_string)
    }

    /// Rewrites the class names inside a field or method descriptor.
    pub fn translate_descriptor(&self, descriptor: &str) -> String {
        let mut out = String::with_capacity(descriptor.len());
        let mut chars = descriptor.chars();

        while let Some(c) = chars.next() {
            if c != 'L' {
                out.push(c);
                continue;
            }

            let name: String = chars.by_ref().take_while(|c| *c != ';').collect();
            out.push('L');
            match Entry::parse_class(&name) {
                Ok(class) => out.push_str(&self.translate(&class)),
                Err(_) => out.push_str(&name),
            }
            out.push(';');
        }

        out
    }

    fn render(&self, entry: &Entry, leaf: Option<&str>) -> String {
        let mut out = String::new();
        for level in entry.ancestry() {
            if level.parent().is_some() {
                out.push(level.kind().separator());
            }
            match leaf {
                Some(name) if level == entry => out.push_str(name),
                _ => out.push_str(self.leaf_name(level)),
            }
        }
        out
    }
}
