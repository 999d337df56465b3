//! Versioned mapping tree.
//!
//! The MappingTree keeps an arena of nodes in a petgraph `StableDiGraph`
//! (parent → child edges) with an `Entry` index for O(1) lookup and a
//! per-parent name-ordered child index. Nodes without a mapping exist only
//! as paths to mapped descendants and are pruned once they become empty.

use crate::error::{Result, TreeError};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::Dfs;
use petgraph::Direction;
use rosetta_core::{Entry, EntryMapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Stable key of a node in the tree arena.
pub type NodeId = NodeIndex;

/// One (Entry, EntryMapping) pair of a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub entry: Entry,
    pub mapping: EntryMapping,
}

impl SnapshotEntry {
    pub fn new(entry: Entry, mapping: EntryMapping) -> Self {
        Self { entry, mapping }
    }
}

/// What a removal took out of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    /// The target's own mapping, if it had one.
    pub previous: Option<EntryMapping>,
    /// Mapped descendants removed along with the target, in tree order.
    pub descendants: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone)]
struct TreeNode {
    entry: Entry,
    mapping: Option<EntryMapping>,
}

/// Children keyed by obfuscated name, then by the entry itself.
type ChildIndex = BTreeMap<(String, Entry), NodeId>;

fn child_key(entry: &Entry) -> (String, Entry) {
    (entry.name().to_string(), entry.clone())
}

/// The authoritative Entry → EntryMapping store.
#[derive(Debug, Default)]
pub struct MappingTree {
    graph: StableDiGraph<TreeNode, ()>,

    /// Maps entries to their node.
    index: HashMap<Entry, NodeId>,

    /// Top-level nodes.
    roots: ChildIndex,

    /// Children of each node, ordered by name.
    children: HashMap<NodeId, ChildIndex>,

    /// Tree version of the last change touching each entry. Survives removal.
    entry_versions: HashMap<Entry, u64>,

    version: u64,
}

impl MappingTree {
    /// Creates an empty tree at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from snapshot pairs at version 0.
    pub fn from_snapshot(pairs: impl IntoIterator<Item = SnapshotEntry>) -> Result<Self> {
        let mut tree = Self::new();
        tree.load_snapshot(pairs)?;
        Ok(tree)
    }

    /// The number of accepted mutations since the last snapshot load.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the mapping attached to `entry`.
    pub fn lookup(&self, entry: &Entry) -> Option<&EntryMapping> {
        let id = self.index.get(entry)?;
        self.graph.node_weight(*id)?.mapping.as_ref()
    }

    /// Returns whether the tree holds a node for `entry`, mapped or not.
    pub fn contains(&self, entry: &Entry) -> bool {
        self.index.contains_key(entry)
    }

    /// Tree version at which `entry` was last changed, 0 if never.
    pub fn entry_version(&self, entry: &Entry) -> u64 {
        self.entry_versions.get(entry).copied().unwrap_or(0)
    }

    /// Number of mapped entries.
    pub fn len(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|n| n.mapping.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of nodes, including unmapped path nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Sets the mapping of `entry`, creating path nodes as needed.
    ///
    /// An empty mapping clears the value. Returns the previous mapping.
    /// Setting the mapping the entry already has leaves the version alone.
    pub fn insert_or_update(
        &mut self,
        entry: Entry,
        mapping: EntryMapping,
    ) -> Option<EntryMapping> {
        let value = if mapping.is_empty() {
            None
        } else {
            Some(mapping)
        };
        if self.lookup(&entry) == value.as_ref() {
            return value;
        }

        let id = self.ensure_path(&entry);
        let previous = match self.graph.node_weight_mut(id) {
            Some(node) => std::mem::replace(&mut node.mapping, value),
            None => None,
        };
        self.prune_from(id);
        self.bump(&entry);

        previous
    }

    /// Removes `entry` and its subtree.
    ///
    /// Fails without touching the tree when a descendant has its own mapping
    /// and `cascade` is false. Removing an absent entry is a no-op.
    pub fn remove(&mut self, entry: &Entry, cascade: bool) -> Result<Removal> {
        let Some(&id) = self.index.get(entry) else {
            return Ok(Removal::default());
        };

        let subtree = self.subtree(id);
        let mapped: Vec<Entry> = subtree
            .iter()
            .filter(|n| **n != id)
            .filter_map(|n| self.graph.node_weight(*n))
            .filter(|node| node.mapping.is_some())
            .map(|node| node.entry.clone())
            .collect();

        if !mapped.is_empty() && !cascade {
            return Err(TreeError::WouldOrphan {
                entry: entry.clone(),
                descendants: mapped,
            });
        }

        let parent = self.parent_id(id);
        let mut removal = Removal::default();

        // Children are detached before their parents.
        for node_id in subtree.into_iter().rev() {
            let Some(node) = self.detach(node_id) else {
                continue;
            };
            if node_id == id {
                removal.previous = node.mapping;
            } else if let Some(mapping) = node.mapping {
                removal
                    .descendants
                    .push(SnapshotEntry::new(node.entry, mapping));
            }
        }
        removal.descendants.reverse();

        if let Some(parent) = parent {
            self.prune_from(parent);
        }

        let version = self.bump(entry);
        for removed in &removal.descendants {
            self.entry_versions.insert(removed.entry.clone(), version);
        }

        if !removal.descendants.is_empty() {
            debug!(
                "Cascaded removal of {} took {} mapped descendants",
                entry,
                removal.descendants.len()
            );
        }

        Ok(removal)
    }

    /// Child entries of `entry` present in the tree, ordered by name.
    pub fn children(&self, entry: &Entry) -> Vec<&Entry> {
        match self.index.get(entry).and_then(|id| self.children.get(id)) {
            Some(children) => self.entries_of(children),
            None => Vec::new(),
        }
    }

    /// Top-level entries present in the tree, ordered by name.
    pub fn roots(&self) -> Vec<&Entry> {
        self.entries_of(&self.roots)
    }

    /// Ancestors of `entry`, outermost first, excluding the entry itself.
    pub fn ancestors<'a>(&self, entry: &'a Entry) -> Vec<&'a Entry> {
        let mut chain = entry.ancestry();
        chain.pop();
        chain
    }

    /// `entry` followed by every entry below it in the tree, parents first.
    /// Empty when `entry` has no node.
    pub fn subtree_entries(&self, entry: &Entry) -> Vec<&Entry> {
        match self.index.get(entry) {
            Some(&id) => self
                .subtree(id)
                .into_iter()
                .filter_map(|n| self.graph.node_weight(n))
                .map(|node| &node.entry)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Entries in the tree sharing `entry`'s parent, excluding `entry`.
    pub fn siblings(&self, entry: &Entry) -> Vec<&Entry> {
        let generation = match entry.parent() {
            Some(parent) => self.children(parent),
            None => self.roots(),
        };
        generation.into_iter().filter(|e| *e != entry).collect()
    }

    /// Iterates over mapped entries in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (&Entry, &EntryMapping)> {
        self.graph
            .node_weights()
            .filter_map(|node| node.mapping.as_ref().map(|m| (&node.entry, m)))
    }

    /// All mapped pairs, parents before children, siblings ordered by name.
    pub fn export_snapshot(&self) -> Vec<SnapshotEntry> {
        let mut out = Vec::with_capacity(self.graph.node_count());
        for id in self.roots.values() {
            self.collect(*id, &mut out);
        }
        out
    }

    /// Replaces the whole tree with `pairs` and resets the version to 0.
    ///
    /// Empty mappings are skipped. On error the current tree is kept.
    pub fn load_snapshot(
        &mut self,
        pairs: impl IntoIterator<Item = SnapshotEntry>,
    ) -> Result<()> {
        let mut fresh = Self::new();
        for pair in pairs {
            if pair.mapping.is_empty() {
                continue;
            }
            if fresh.lookup(&pair.entry).is_some() {
                return Err(TreeError::DuplicateEntry(pair.entry));
            }
            let id = fresh.ensure_path(&pair.entry);
            if let Some(node) = fresh.graph.node_weight_mut(id) {
                node.mapping = Some(pair.mapping);
            }
        }

        debug!("Loaded snapshot with {} mapped entries", fresh.len());
        *self = fresh;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    /// Forces the tree version, stamping `entries` as changed at it.
    /// Used when replaying changes whose versions are already assigned.
    pub(crate) fn stamp<'e>(
        &mut self,
        version: u64,
        entries: impl IntoIterator<Item = &'e Entry>,
    ) {
        self.version = version;
        for entry in entries {
            self.entry_versions.insert(entry.clone(), version);
        }
    }

    fn bump(&mut self, entry: &Entry) -> u64 {
        self.version += 1;
        self.entry_versions.insert(entry.clone(), self.version);
        self.version
    }

    fn entries_of(&self, children: &ChildIndex) -> Vec<&Entry> {
        children
            .values()
            .filter_map(|id| self.graph.node_weight(*id))
            .map(|node| &node.entry)
            .collect()
    }

    fn parent_id(&self, id: NodeId) -> Option<NodeId> {
        self.graph
            .neighbors_directed(id, Direction::Incoming)
            .next()
    }

    /// Returns the node for `entry`, creating it and its ancestors.
    fn ensure_path(&mut self, entry: &Entry) -> NodeId {
        if let Some(&id) = self.index.get(entry) {
            return id;
        }

        let parent_id = entry.parent().map(|parent| self.ensure_path(parent));
        let id = self.graph.add_node(TreeNode {
            entry: entry.clone(),
            mapping: None,
        });
        self.index.insert(entry.clone(), id);

        match parent_id {
            Some(parent_id) => {
                self.graph.add_edge(parent_id, id, ());
                self.children
                    .entry(parent_id)
                    .or_default()
                    .insert(child_key(entry), id);
            }
            None => {
                self.roots.insert(child_key(entry), id);
            }
        }

        id
    }

    /// Removes a single node and unlinks it from every index.
    fn detach(&mut self, id: NodeId) -> Option<TreeNode> {
        let parent = self.parent_id(id);
        let node = self.graph.remove_node(id)?;
        let key = child_key(&node.entry);

        self.index.remove(&node.entry);
        self.children.remove(&id);
        match parent {
            Some(parent) => {
                if let Some(siblings) = self.children.get_mut(&parent) {
                    siblings.remove(&key);
                }
            }
            None => {
                self.roots.remove(&key);
            }
        }

        Some(node)
    }

    /// Walks up from `id`, dropping nodes with neither mapping nor children.
    fn prune_from(&mut self, mut id: NodeId) {
        loop {
            let Some(node) = self.graph.node_weight(id) else {
                return;
            };
            let has_children = self.children.get(&id).is_some_and(|c| !c.is_empty());
            if node.mapping.is_some() || has_children {
                return;
            }

            let parent = self.parent_id(id);
            self.detach(id);
            match parent {
                Some(parent) => id = parent,
                None => return,
            }
        }
    }

    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut dfs = Dfs::new(&self.graph, root);
        let mut nodes = Vec::new();
        while let Some(id) = dfs.next(&self.graph) {
            nodes.push(id);
        }
        nodes
    }

    fn collect(&self, id: NodeId, out: &mut Vec<SnapshotEntry>) {
        if let Some(node) = self.graph.node_weight(id) {
            if let Some(mapping) = &node.mapping {
                out.push(SnapshotEntry::new(node.entry.clone(), mapping.clone()));
            }
        }
        if let Some(children) = self.children.get(&id) {
            for child in children.values() {
                self.collect(*child, out);
            }
        }
    }
}
