//! Read-only facts about the analysed program.
//!
//! The class universe, synthetic flags and package partitions come from an
//! upstream analysis pass. The validator only ever reads them.

use rosetta_core::Entry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A set of classes that must all resolve to one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub members: BTreeSet<Entry>,
}

impl Partition {
    pub fn new(members: impl IntoIterator<Item = Entry>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }
}

/// Query surface over the upstream analysis results.
pub trait ClassIndex: Send + Sync {
    /// Whether the entry is known to the analysed program.
    fn contains(&self, entry: &Entry) -> bool;

    /// Whether the entry was generated by the compiler.
    fn is_synthetic(&self, entry: &Entry) -> bool;

    /// The package partition containing `class`, if any.
    fn partition_of(&self, class: &Entry) -> Option<&Partition>;

    /// Entries declared directly under `parent` (`None` for top-level classes).
    fn members(&self, parent: Option<&Entry>) -> Vec<Entry>;

    fn is_empty(&self) -> bool;
}

/// Serialized form of an index, as written by the analysis tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(default)]
    pub entries: Vec<IndexedEntry>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub entry: Entry,
    #[serde(default)]
    pub synthetic: bool,
}

/// In-memory [`ClassIndex`] built from an [`IndexSnapshot`].
#[derive(Debug, Default, Clone)]
pub struct StaticIndex {
    entries: HashSet<Entry>,
    synthetic: HashSet<Entry>,
    members: HashMap<Option<Entry>, BTreeSet<Entry>>,
    partitions: Vec<Partition>,
    partition_by_class: HashMap<Entry, usize>,
}

impl StaticIndex {
    /// An index that knows nothing. Every rule depending on it passes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers an entry and, implicitly, its parents.
    pub fn insert(&mut self, entry: Entry, synthetic: bool) {
        if synthetic {
            self.synthetic.insert(entry.clone());
        }

        let mut current = Some(entry);
        while let Some(entry) = current {
            if !self.entries.insert(entry.clone()) {
                break;
            }
            let parent = entry.parent().cloned();
            self.members
                .entry(parent.clone())
                .or_default()
                .insert(entry);
            current = parent;
        }
    }

    pub fn add_partition(&mut self, partition: Partition) {
        let slot = self.partitions.len();
        for member in &partition.members {
            self.partition_by_class.insert(member.clone(), slot);
        }
        self.partitions.push(partition);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl From<IndexSnapshot> for StaticIndex {
    fn from(snapshot: IndexSnapshot) -> Self {
        let mut index = StaticIndex::empty();
        for item in snapshot.entries {
            index.insert(item.entry, item.synthetic);
        }
        for partition in snapshot.partitions {
            index.add_partition(partition);
        }
        index
    }
}

impl ClassIndex for StaticIndex {
    fn contains(&self, entry: &Entry) -> bool {
        self.entries.contains(entry)
    }

    fn is_synthetic(&self, entry: &Entry) -> bool {
        self.synthetic.contains(entry)
    }

    fn partition_of(&self, class: &Entry) -> Option<&Partition> {
        self.partition_by_class
            .get(class)
            .and_then(|slot| self.partitions.get(*slot))
    }

    fn members(&self, parent: Option<&Entry>) -> Vec<Entry> {
        self.members
            .get(&parent.cloned())
            .map(|siblings| siblings.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
