//! Taxonomy model and hierarchical re-scoring for the classification service.

mod engine;
mod result;
mod taxonomy;

pub use engine::HierarchyEngine;
pub use result::ClassificationResult;
pub use taxonomy::{HierarchyNode, NodeId, PriorError, Taxonomy, TaxonomyError};
