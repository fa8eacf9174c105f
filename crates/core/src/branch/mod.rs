//! Site configuration branches.
//!
//! A branch is the subtree built from one site YAML document. Loading parses
//! the document, applies overrides, fingerprints the resolved payload and
//! reshapes the raw mapping into category groups and source datasets.

mod enrich;
pub mod expr;
mod loader;

pub use enrich::{enrich_branch, DEFAULT_KEYS, FUNCTION_KEYS};
pub use expr::{evaluate, ExprError, MathContext};
pub use loader::{add_yaml_file, add_yaml_str, BranchLoader};

use thiserror::Error;

use crate::model::TreeError;

/// Errors that can occur while loading a branch.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("site file not found: {0}")]
    NotFound(String),

    #[error("failed to read site file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse site YAML: {0}")]
    Parse(String),

    #[error(transparent)]
    Tree(#[from] TreeError),
}
