//! One-shot messages crossing the worker boundary.
//!
//! A `Request` is consumed exactly once by the worker; its `Response` is
//! consumed exactly once by the dispatcher and matched back to the waiter by
//! `correlation_id`.

use std::collections::{BTreeMap, HashMap};

use canopy_ai::ClassifyError;
use canopy_core::{ClassificationResult, NodeId, PriorError};
use thiserror::Error;

/// An enqueued classification request. Immutable once pushed.
#[derive(Debug)]
pub struct Request {
    pub payload: Vec<u8>,
    pub priors: HashMap<NodeId, f64>,
    pub correlation_id: u64,
}

/// The worker's answer for one request, error-tagged on failure so the
/// dispatcher's waiter is always released.
#[derive(Debug)]
pub struct Response {
    pub outcome: Result<Scored, WorkerFailure>,
    pub correlation_id: u64,
}

/// Successful classification: the flat result plus hierarchy-aware scores.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub result: ClassificationResult,
    pub hierarchy: BTreeMap<NodeId, f64>,
}

/// Why the worker could not score a request. Carried inside a [`Response`]
/// rather than crashing the worker loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerFailure {
    /// Payload rejected before inference; client error, not retryable.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The model failed during prediction.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Priors failed worker-side validation. Normally caught at the
    /// dispatcher, but the worker re-checks since the channel accepts any
    /// producer.
    #[error("invalid priors: {0}")]
    InvalidPriors(#[from] PriorError),
}

impl From<ClassifyError> for WorkerFailure {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::InvalidPayload(msg) => Self::InvalidPayload(msg),
            ClassifyError::Inference(msg) => Self::Inference(msg),
        }
    }
}
