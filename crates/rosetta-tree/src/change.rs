//! Atomic mutation records and the ordered log they form.

use crate::error::Result;
use crate::tree::{MappingTree, SnapshotEntry};
use rosetta_core::{Entry, EntryMapping};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

/// What a client asks to do to one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MappingEdit {
    /// Replace the entry's mapping. An empty mapping clears it.
    Set { mapping: EntryMapping },

    /// Remove the entry and its subtree.
    Remove {
        #[serde(default)]
        cascade: bool,
    },
}

impl MappingEdit {
    pub fn set(mapping: EntryMapping) -> Self {
        MappingEdit::Set { mapping }
    }

    /// The mapping this edit would leave on the target.
    pub fn resulting_mapping(&self) -> Option<&EntryMapping> {
        match self {
            MappingEdit::Set { mapping } if !mapping.is_empty() => Some(mapping),
            _ => None,
        }
    }
}

/// One accepted mutation of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Tree version after this change.
    pub version: u64,
    pub target: Entry,
    pub previous: Option<EntryMapping>,
    /// The new mapping, or `None` for a tombstone.
    pub mapping: Option<EntryMapping>,
    /// Mapped descendants taken out by a cascading removal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cascaded: Vec<SnapshotEntry>,
    #[serde(default)]
    pub author: Option<Uuid>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Change {
    pub fn is_tombstone(&self) -> bool {
        self.mapping.is_none()
    }
}

impl MappingTree {
    /// Whether applying `edit` to `target` would leave the tree as it is.
    pub fn is_unchanged_by(&self, target: &Entry, edit: &MappingEdit) -> bool {
        match edit {
            MappingEdit::Set { mapping } if mapping.is_empty() => self.lookup(target).is_none(),
            MappingEdit::Set { mapping } => self.lookup(target) == Some(mapping),
            MappingEdit::Remove { .. } => !self.contains(target),
        }
    }

    /// Applies `edit` to `target` and records it as a [`Change`].
    ///
    /// `cascade` forces subtree removal even when the edit did not ask for
    /// it. Nothing is changed when an error is returned. Returns `None`
    /// without bumping the version when the edit has no effect.
    pub fn commit(
        &mut self,
        target: Entry,
        edit: MappingEdit,
        cascade: bool,
        author: Option<Uuid>,
    ) -> Result<Option<Change>> {
        if self.is_unchanged_by(&target, &edit) {
            return Ok(None);
        }

        let (previous, mapping, cascaded) = match edit {
            MappingEdit::Set { mapping } if !mapping.is_empty() => {
                let previous = self.insert_or_update(target.clone(), mapping.clone());
                (previous, Some(mapping), Vec::new())
            }
            MappingEdit::Set { mapping } => {
                let previous = self.insert_or_update(target.clone(), mapping);
                (previous, None, Vec::new())
            }
            MappingEdit::Remove { cascade: requested } => {
                let removal = self.remove(&target, cascade || requested)?;
                (removal.previous, None, removal.descendants)
            }
        };

        Ok(Some(Change {
            version: self.version(),
            target,
            previous,
            mapping,
            cascaded,
            author,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }))
    }

    /// Re-applies a recorded change, adopting its version.
    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match &change.mapping {
            Some(mapping) => {
                self.insert_or_update(change.target.clone(), mapping.clone());
            }
            None if change.cascaded.is_empty() => {
                self.insert_or_update(change.target.clone(), EntryMapping::default());
            }
            None => {
                self.remove(&change.target, true)?;
            }
        }

        let touched = std::iter::once(&change.target)
            .chain(change.cascaded.iter().map(|c| &c.entry));
        self.stamp(change.version, touched);
        Ok(())
    }
}

/// Append-only, totally ordered record of accepted changes.
///
/// Holds the changes after `base_version`. With a non-zero retention the
/// oldest changes are dropped and the base moves forward.
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    base_version: u64,
    changes: VecDeque<Change>,
    retention: usize,
}

impl ChangeLog {
    /// A log keeping at most `retention` changes (0 keeps everything).
    pub fn new(retention: usize) -> Self {
        Self {
            base_version: 0,
            changes: VecDeque::new(),
            retention,
        }
    }

    pub fn append(&mut self, change: Change) {
        self.changes.push_back(change);
        if self.retention > 0 {
            while self.changes.len() > self.retention {
                if let Some(dropped) = self.changes.pop_front() {
                    self.base_version = dropped.version;
                }
            }
        }
    }

    /// Version of the newest change, or the base when empty.
    pub fn latest_version(&self) -> u64 {
        self.changes
            .back()
            .map(|c| c.version)
            .unwrap_or(self.base_version)
    }

    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    /// Changes strictly after `version`, or `None` when the log no longer
    /// reaches back that far (or `version` is in the future).
    pub fn since(&self, version: u64) -> Option<Vec<Change>> {
        if version < self.base_version || version > self.latest_version() {
            return None;
        }
        Some(
            self.changes
                .iter()
                .filter(|c| c.version > version)
                .cloned()
                .collect(),
        )
    }

    /// Forgets every change and starts again from `base_version`.
    pub fn reset(&mut self, base_version: u64) {
        self.changes.clear();
        self.base_version = base_version;
    }

    /// Rebuilds a tree by folding the log over the snapshot taken at the
    /// log's base version.
    pub fn replay(&self, base: impl IntoIterator<Item = SnapshotEntry>) -> Result<MappingTree> {
        let mut tree = MappingTree::from_snapshot(base)?;
        tree.stamp(self.base_version, std::iter::empty());
        for change in &self.changes {
            tree.apply(change)?;
        }
        debug!(
            "Replayed {} changes up to version {}",
            self.changes.len(),
            tree.version()
        );
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}
