pub mod graph;
pub mod selector;

pub use graph::{ExpanderConfig, ExpansionReport, GraphData, GraphExpander};
pub use selector::{FileSelector, ScoredFile, SelectorConfig};

use cbo_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RetrievalError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage(err) => err.kind(),
        }
    }
}
