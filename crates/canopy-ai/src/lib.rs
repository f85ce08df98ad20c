//! Classifier boundary: the inference worker talks to models through
//! [`Classifier`], with an ONNX Runtime implementation behind the `onnx`
//! feature.

mod classifier;
pub use classifier::{Classifier, ClassifyError};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;
