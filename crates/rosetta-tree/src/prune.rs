//! Dropping mappings that no longer apply to the analysed program.

use crate::index::ClassIndex;
use crate::tree::SnapshotEntry;
use serde::Serialize;
use std::fmt;

/// Why a snapshot pair was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The outermost class is not part of the class universe.
    UnknownClass,
    /// Neither a name nor docs nor an access override.
    EmptyMapping,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownClass => write!(f, "unknown class"),
            Self::EmptyMapping => write!(f, "empty mapping"),
        }
    }
}

/// Result of [`drop_invalid`].
#[derive(Debug, Default)]
pub struct Pruned {
    pub kept: Vec<SnapshotEntry>,
    pub dropped: Vec<(SnapshotEntry, DropReason)>,
}

/// Splits snapshot pairs into those worth keeping and those to drop.
///
/// An empty index knows no classes, so it keeps every non-empty mapping.
pub fn drop_invalid(
    pairs: impl IntoIterator<Item = SnapshotEntry>,
    index: &dyn ClassIndex,
) -> Pruned {
    let check_classes = !index.is_empty();
    let mut pruned = Pruned::default();

    for pair in pairs {
        let reason = if pair.mapping.is_empty() {
            Some(DropReason::EmptyMapping)
        } else if check_classes && !index.contains(pair.entry.outermost_class()) {
            Some(DropReason::UnknownClass)
        } else {
            None
        };

        match reason {
            Some(reason) => pruned.dropped.push((pair, reason)),
            None => pruned.kept.push(pair),
        }
    }

    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::StaticIndex;
    use rosetta_core::{Entry, EntryMapping};

    #[test]
    fn test_drops_unknown_and_empty() {
        let known = Entry::class("a").unwrap();
        let gone = Entry::class("z").unwrap();

        let mut index = StaticIndex::empty();
        index.insert(known.clone(), false);

        let pairs = vec![
            SnapshotEntry::new(known.field("f", "I").unwrap(), EntryMapping::named("count")),
            SnapshotEntry::new(gone.clone(), EntryMapping::named("Gone")),
            SnapshotEntry::new(known.clone(), EntryMapping::default()),
        ];

        let pruned = drop_invalid(pairs, &index);
        assert_eq!(pruned.kept.len(), 1);
        assert_eq!(pruned.dropped.len(), 2);
        assert_eq!(pruned.dropped[0].0.entry, gone);
        assert_eq!(pruned.dropped[0].1, DropReason::UnknownClass);
        assert_eq!(pruned.dropped[1].1, DropReason::EmptyMapping);
    }

    #[test]
    fn test_empty_index_keeps_everything_named() {
        let pairs = vec![SnapshotEntry::new(
            Entry::class("a").unwrap(),
            EntryMapping::named("Main"),
        )];
        let pruned = drop_invalid(pairs, &StaticIndex::empty());
        assert_eq!(pruned.kept.len(), 1);
        assert!(pruned.dropped.is_empty());
    }
}
