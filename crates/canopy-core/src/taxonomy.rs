//! Label taxonomy: a rooted forest of nodes built once at worker startup.
//!
//! Two input files describe the taxonomy: a label list (one unique classifier
//! label per line) and a hierarchy description (JSON array of nodes). Leaf
//! nodes are matched to classifier outputs by label; internal nodes aggregate
//! their descendants. The structure is validated on load and read-only
//! afterwards.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Identifier of a taxonomy node, unique within one taxonomy.
pub type NodeId = String;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid hierarchy JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate label in label list: {0}")]
    DuplicateLabel(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("duplicate leaf label: {0}")]
    DuplicateLeafLabel(String),

    #[error("node {id} references unknown parent {parent}")]
    UnknownParent { id: String, parent: String },

    #[error("cycle in hierarchy involving node {0}")]
    Cycle(String),

    #[error("default prior for {node} out of range: {value} (must be in [0, 1])")]
    PriorOutOfRange { node: String, value: f64 },
}

/// Rejected request-time priors. Validation runs before any computation or
/// channel traffic, so a bad request never reaches the worker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriorError {
    #[error("prior references unknown node: {0}")]
    UnknownNode(String),

    #[error("prior for {node} out of range: {value} (must be in [0, 1])")]
    OutOfRange { node: String, value: f64 },
}

/// One node of the taxonomy forest.
///
/// `label` links a leaf to the classifier output with the same label; for
/// internal nodes it is display metadata only. `prior` is the default weight
/// used when a request supplies no override for this node.
#[derive(Debug, Clone, Deserialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub label: String,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default = "default_prior")]
    pub prior: f64,
}

fn default_prior() -> f64 {
    1.0
}

/// A validated, read-only taxonomy.
///
/// Nodes keep their file order; that order fixes the traversal the engine
/// uses, which keeps re-scoring deterministic.
#[derive(Debug)]
pub struct Taxonomy {
    nodes: Vec<HierarchyNode>,
    index: HashMap<NodeId, usize>,
    children: Vec<Vec<usize>>,
    /// Post-order over the forest: every node appears after all its children.
    post_order: Vec<usize>,
    labels: Vec<String>,
}

impl Taxonomy {
    /// Load and validate a taxonomy from a label list and a hierarchy file.
    ///
    /// Fatal on any structural problem: duplicate labels or ids, two leaves
    /// sharing a label, unknown parent references, cycles, or default priors
    /// outside [0, 1]. A leaf whose label matches no classifier label is
    /// allowed; it scores 0.
    pub fn load(labels_path: &Path, hierarchy_path: &Path) -> Result<Self, TaxonomyError> {
        let raw_labels = std::fs::read_to_string(labels_path).map_err(|source| {
            TaxonomyError::Io {
                path: labels_path.to_path_buf(),
                source,
            }
        })?;
        let labels: Vec<String> = raw_labels
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let raw_hierarchy = std::fs::read_to_string(hierarchy_path).map_err(|source| {
            TaxonomyError::Io {
                path: hierarchy_path.to_path_buf(),
                source,
            }
        })?;
        let nodes: Vec<HierarchyNode> = serde_json::from_str(&raw_hierarchy)?;

        let taxonomy = Self::build(labels, nodes)?;
        info!(
            labels = taxonomy.labels.len(),
            nodes = taxonomy.nodes.len(),
            roots = taxonomy.root_count(),
            "loaded taxonomy"
        );
        Ok(taxonomy)
    }

    /// Build a taxonomy from in-memory parts, validating the forest.
    pub fn build(labels: Vec<String>, nodes: Vec<HierarchyNode>) -> Result<Self, TaxonomyError> {
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(TaxonomyError::DuplicateLabel(label.clone()));
            }
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(TaxonomyError::DuplicateNode(node.id.clone()));
            }
            if !(0.0..=1.0).contains(&node.prior) {
                return Err(TaxonomyError::PriorOutOfRange {
                    node: node.id.clone(),
                    value: node.prior,
                });
            }
        }

        let mut children = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            if let Some(parent) = &node.parent {
                let &p = index
                    .get(parent)
                    .ok_or_else(|| TaxonomyError::UnknownParent {
                        id: node.id.clone(),
                        parent: parent.clone(),
                    })?;
                children[p].push(i);
            }
        }

        // Each leaf claims the classifier mass for its label; two leaves
        // sharing a label would both take the full amount and break the
        // root-level sum bound. Internal-node labels are display-only and
        // may repeat.
        let mut leaf_labels = HashSet::new();
        for (i, node) in nodes.iter().enumerate() {
            if children[i].is_empty() && !leaf_labels.insert(node.label.as_str()) {
                return Err(TaxonomyError::DuplicateLeafLabel(node.label.clone()));
            }
        }

        let post_order = post_order(&nodes, &children)?;

        Ok(Self {
            nodes,
            index,
            children,
            post_order,
            labels,
        })
    }

    /// Reject priors that reference unknown nodes or fall outside [0, 1].
    pub fn validate_priors(&self, priors: &HashMap<NodeId, f64>) -> Result<(), PriorError> {
        for (id, &value) in priors {
            if !self.index.contains_key(id) {
                return Err(PriorError::UnknownNode(id.clone()));
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(PriorError::OutOfRange {
                    node: id.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&HierarchyNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Classifier labels, in label-list order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub(crate) fn nodes(&self) -> &[HierarchyNode] {
        &self.nodes
    }

    pub(crate) fn children_of(&self, idx: usize) -> &[usize] {
        &self.children[idx]
    }

    pub(crate) fn post_order_indices(&self) -> &[usize] {
        &self.post_order
    }

    fn root_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.parent.is_none()).count()
    }
}

/// Post-order over the forest, following file order among siblings and roots.
///
/// Doubles as cycle detection: a node reachable from itself via parent links
/// is never emitted by a root-driven traversal, so any node left unvisited
/// sits on a cycle.
fn post_order(
    nodes: &[HierarchyNode],
    children: &[Vec<usize>],
) -> Result<Vec<usize>, TaxonomyError> {
    let mut order = Vec::with_capacity(nodes.len());
    let mut visited = vec![false; nodes.len()];

    for (root, node) in nodes.iter().enumerate() {
        if node.parent.is_some() {
            continue;
        }
        // Iterative post-order: (index, children-emitted flag).
        let mut stack = vec![(root, false)];
        while let Some((i, expanded)) = stack.pop() {
            if expanded {
                visited[i] = true;
                order.push(i);
                continue;
            }
            stack.push((i, true));
            for &c in children[i].iter().rev() {
                stack.push((c, false));
            }
        }
    }

    if order.len() != nodes.len() {
        let stranded = visited
            .iter()
            .position(|&v| !v)
            .map(|i| nodes[i].id.clone())
            .unwrap_or_default();
        return Err(TaxonomyError::Cycle(stranded));
    }
    Ok(order)
}
