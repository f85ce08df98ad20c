//! The model-facing seam: one payload in, one flat probability vector out.

use canopy_core::ClassificationResult;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    /// The payload was rejected before any inference ran. Callers treat this
    /// as a client error and never retry it.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The model itself failed during prediction.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// A classifier mapping a raw payload to leaf-label probabilities.
///
/// Implementations are stateful and may hold GPU or runtime handles; the
/// worker owns exactly one instance and calls it sequentially, so `&mut self`
/// is enough and no internal locking is expected.
pub trait Classifier: Send {
    fn classify(&mut self, payload: &[u8]) -> Result<ClassificationResult, ClassifyError>;
}
