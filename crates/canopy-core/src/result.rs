//! Flat classifier output consumed by the hierarchy engine.

use serde::{Deserialize, Serialize};

/// Leaf-level probabilities emitted by a classifier.
///
/// Pairs are in label-list order; the engine looks labels up by name, so
/// callers never depend on positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub probabilities: Vec<(String, f32)>,
}

impl ClassificationResult {
    pub fn new(probabilities: Vec<(String, f32)>) -> Self {
        Self { probabilities }
    }

    /// Probability for a label, if the classifier emitted one.
    pub fn probability(&self, label: &str) -> Option<f32> {
        self.probabilities
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    /// Label with the highest probability.
    pub fn top(&self) -> Option<(&str, f32)> {
        self.probabilities
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(l, p)| (l.as_str(), *p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_lookup_by_label() {
        let result = ClassificationResult::new(vec![
            ("cat".into(), 0.7),
            ("dog".into(), 0.3),
        ]);
        assert_eq!(result.probability("cat"), Some(0.7));
        assert_eq!(result.probability("fish"), None);
    }

    #[test]
    fn top_picks_highest() {
        let result = ClassificationResult::new(vec![
            ("cat".into(), 0.2),
            ("dog".into(), 0.5),
            ("fish".into(), 0.3),
        ]);
        assert_eq!(result.top(), Some(("dog", 0.5)));
    }

    #[test]
    fn top_of_empty_is_none() {
        let result = ClassificationResult::new(vec![]);
        assert!(result.top().is_none());
    }

    #[test]
    fn json_roundtrip() {
        let result = ClassificationResult::new(vec![("cat".into(), 0.75)]);
        let json = serde_json::to_string(&result).unwrap();
        let parsed: ClassificationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }
}
