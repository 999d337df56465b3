//! Rename legality checks.
//!
//! Every check runs against the current tree. A failed check produces a
//! [`Rejection`] naming the rule and the entries involved, so callers can
//! relay something actionable instead of a bare yes/no.

use crate::change::MappingEdit;
use crate::index::ClassIndex;
use crate::translator::Translator;
use crate::tree::MappingTree;
use rosetta_core::identifier::{validate_docs, validate_name};
use rosetta_core::{split_package, Entry, EntryMapping};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How a failed rule is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The edit is refused.
    #[default]
    Hard,
    /// The edit goes through and the finding is reported alongside it.
    Advisory,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Hard => "hard",
            Severity::Advisory => "advisory",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which rule a finding comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    IllegalName,
    IllegalDocs,
    NotRenamable,
    NameCollision,
    SyntheticEntry,
    PackagePartition,
    /// Raised by the tree rather than the validator: a removal that would
    /// strand mapped descendants.
    WouldOrphan,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::IllegalName => "illegal_name",
            RuleId::IllegalDocs => "illegal_docs",
            RuleId::NotRenamable => "not_renamable",
            RuleId::NameCollision => "name_collision",
            RuleId::SyntheticEntry => "synthetic_entry",
            RuleId::PackagePartition => "package_partition",
            RuleId::WouldOrphan => "would_orphan",
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rule: RuleId,
    pub severity: Severity,
    pub message: String,
    /// Entries that caused the failure, the target first when relevant.
    pub offending: Vec<Entry>,
}

/// Outcome of validating one edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub errors: Vec<Rejection>,
    pub warnings: Vec<Rejection>,
}

impl Verdict {
    /// True when no hard rule failed.
    pub fn is_accepted(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, rejection: Rejection) {
        match rejection.severity {
            Severity::Hard => self.errors.push(rejection),
            Severity::Advisory => self.warnings.push(rejection),
        }
    }
}

/// Operating-mode knobs for the validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    #[serde(default)]
    pub partition_severity: Severity,
}

pub struct Validator<'a> {
    tree: &'a MappingTree,
    index: &'a dyn ClassIndex,
    policy: ValidationPolicy,
    overrides: Option<&'a HashMap<Entry, bool>>,
}

impl<'a> Validator<'a> {
    pub fn new(
        tree: &'a MappingTree,
        index: &'a dyn ClassIndex,
        policy: ValidationPolicy,
    ) -> Self {
        Self {
            tree,
            index,
            policy,
            overrides: None,
        }
    }

    /// Administrative synthetic flags that take precedence over the index.
    pub fn with_overrides(mut self, overrides: &'a HashMap<Entry, bool>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Whether `entry` is currently treated as compiler-generated.
    pub fn is_synthetic(&self, entry: &Entry) -> bool {
        self.overrides
            .and_then(|o| o.get(entry).copied())
            .unwrap_or_else(|| self.index.is_synthetic(entry))
    }

    /// Checks any edit against the current tree.
    ///
    /// A removal drops the names of the target and everything below it, so
    /// each of those is checked under its obfuscated name.
    pub fn validate_edit(&self, entry: &Entry, edit: &MappingEdit) -> Verdict {
        match edit {
            MappingEdit::Set { mapping } => self.validate_mapping(entry, mapping),
            MappingEdit::Remove { .. } => {
                let removed: Vec<&Entry> = self.tree.subtree_entries(entry);
                self.validate_unnamed(&removed)
            }
        }
    }

    /// Checks a full mapping: the name, if it changes, and the docs.
    pub fn validate_mapping(&self, entry: &Entry, mapping: &EntryMapping) -> Verdict {
        let current = self.tree.lookup(entry).and_then(|m| m.name.as_deref());
        let mut verdict = match mapping.name.as_deref() {
            Some(name) if current == Some(name) => Verdict::default(),
            Some(name) => self.validate_rename(entry, name),
            None => self.validate_unnamed(&[entry]),
        };

        if let Some(docs) = mapping.docs.as_deref() {
            if let Err(e) = validate_docs(docs) {
                verdict.push(hard(RuleId::IllegalDocs, e.to_string(), vec![entry.clone()]));
            }
        }

        verdict
    }

    /// Checks renaming `entry` to `name`.
    pub fn validate_rename(&self, entry: &Entry, name: &str) -> Verdict {
        let mut verdict = Verdict::default();

        if !entry.is_renamable() {
            verdict.push(hard(
                RuleId::NotRenamable,
                format!("{} cannot be renamed", entry),
                vec![entry.clone()],
            ));
            return verdict;
        }

        if let Err(e) = validate_name(entry, name) {
            verdict.push(hard(RuleId::IllegalName, e.to_string(), vec![entry.clone()]));
            return verdict;
        }

        if self.is_synthetic(entry) {
            verdict.push(hard(
                RuleId::SyntheticEntry,
                format!("{} is compiler-generated", entry),
                vec![entry.clone()],
            ));
        }

        if let Some(rejection) = self.check_collision(entry, name, &HashSet::new()) {
            verdict.push(rejection);
        }

        if let Some(rejection) = self.check_partition(entry, name) {
            verdict.push(rejection);
        }

        verdict
    }

    /// Checks entries that are about to lose their names and fall back to
    /// their obfuscated ones. Entries without a name are skipped.
    fn validate_unnamed(&self, entries: &[&Entry]) -> Verdict {
        let mut verdict = Verdict::default();
        let unnamed: HashSet<&Entry> = entries.iter().copied().collect();

        for entry in entries {
            let named = self.tree.lookup(entry).is_some_and(|m| m.name.is_some());
            if !named {
                continue;
            }
            if let Some(rejection) = self.check_collision(entry, entry.name(), &unnamed) {
                verdict.push(rejection);
            }
            if let Some(rejection) = self.check_partition(entry, entry.name()) {
                verdict.push(rejection);
            }
        }

        verdict
    }

    /// `unnamed` holds siblings that are losing their names in the same edit.
    fn check_collision(
        &self,
        entry: &Entry,
        name: &str,
        unnamed: &HashSet<&Entry>,
    ) -> Option<Rejection> {
        let translator = Translator::new(self.tree);

        let mut candidates: Vec<Entry> = self.tree.siblings(entry).into_iter().cloned().collect();
        candidates.extend(self.index.members(entry.parent()));
        candidates.sort();
        candidates.dedup();

        let clashing: Vec<Entry> = candidates
            .into_iter()
            .filter(|other| other != entry && entry.can_conflict_with(other))
            .filter(|other| {
                let leaf = if unnamed.contains(other) {
                    other.name()
                } else {
                    translator.leaf_name(other)
                };
                leaf == name
            })
            .collect();

        if clashing.is_empty() {
            return None;
        }

        let mut offending = vec![entry.clone()];
        offending.extend(clashing);
        Some(hard(
            RuleId::NameCollision,
            format!(
                "{} would collide with an existing name",
                translator.translate_as(entry, name)
            ),
            offending,
        ))
    }

    fn check_partition(&self, entry: &Entry, name: &str) -> Option<Rejection> {
        if entry.parent().is_some() {
            return None;
        }
        let partition = self.index.partition_of(entry)?;

        let translator = Translator::new(self.tree);
        let package = split_package(name).0;

        let split: Vec<Entry> = partition
            .members
            .iter()
            .filter(|member| *member != entry)
            .filter(|member| translator.package_of(member).as_deref() != package)
            .cloned()
            .collect();

        if split.is_empty() {
            return None;
        }

        let mut offending = vec![entry.clone()];
        offending.extend(split);
        Some(Rejection {
            rule: RuleId::PackagePartition,
            severity: self.policy.partition_severity,
            message: format!(
                "moving {} to package '{}' splits a package-private group",
                entry,
                package.unwrap_or("")
            ),
            offending,
        })
    }
}

fn hard(rule: RuleId, message: String, offending: Vec<Entry>) -> Rejection {
    Rejection {
        rule,
        severity: Severity::Hard,
        message,
        offending,
    }
}
