use rosetta_core::{CoreError, Entry};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("removing {entry} would orphan {} mapped descendant(s)", .descendants.len())]
    WouldOrphan {
        entry: Entry,
        descendants: Vec<Entry>,
    },

    #[error("snapshot maps {0} more than once")]
    DuplicateEntry(Entry),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, TreeError>;
