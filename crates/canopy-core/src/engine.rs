//! Hierarchical probability re-scoring.
//!
//! Turns a flat leaf-level probability vector into a score for every node of
//! the taxonomy, weighted by request-time priors. Pure computation: identical
//! inputs yield bit-identical outputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::result::ClassificationResult;
use crate::taxonomy::{NodeId, PriorError, Taxonomy};

/// Re-scores classifier output over a shared read-only taxonomy.
///
/// Scoring rule: a leaf scores its (clamped, renormalized) classifier
/// probability times its effective prior; an internal node scores its
/// effective prior times the capped sum of its children's scores. The
/// effective prior is the request override when present, else the node's
/// default. Capping at 1 plus the renormalization keeps every score in
/// [0, 1] and the root-level scores summing to at most 1.
pub struct HierarchyEngine {
    taxonomy: Arc<Taxonomy>,
}

impl HierarchyEngine {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    /// Score every taxonomy node for one classifier result.
    ///
    /// Validates `priors` before touching anything else; a failed validation
    /// produces no partial output.
    pub fn compute(
        &self,
        result: &ClassificationResult,
        priors: &HashMap<NodeId, f64>,
    ) -> Result<BTreeMap<NodeId, f64>, PriorError> {
        self.taxonomy.validate_priors(priors)?;

        // Clamp to [0, 1] and renormalize when the classifier's total mass
        // exceeds 1, so downstream sums stay bounded.
        let mut leaf_prob: HashMap<&str, f64> = HashMap::new();
        let mut total = 0.0f64;
        for (label, p) in &result.probabilities {
            let p = (*p as f64).clamp(0.0, 1.0);
            total += p;
            leaf_prob.insert(label.as_str(), p);
        }
        let scale = if total > 1.0 { 1.0 / total } else { 1.0 };

        let nodes = self.taxonomy.nodes();
        let mut scores = vec![0.0f64; nodes.len()];

        // Children precede parents in post-order, so one pass suffices.
        for &i in self.taxonomy.post_order_indices() {
            let node = &nodes[i];
            let prior = priors.get(&node.id).copied().unwrap_or(node.prior);
            let children = self.taxonomy.children_of(i);

            scores[i] = if children.is_empty() {
                let p = leaf_prob.get(node.label.as_str()).copied().unwrap_or(0.0);
                p * scale * prior
            } else {
                let mass: f64 = children.iter().map(|&c| scores[c]).sum();
                prior * mass.min(1.0)
            };
        }

        Ok(nodes
            .iter()
            .zip(&scores)
            .map(|(node, &s)| (node.id.clone(), s))
            .collect())
    }
}
