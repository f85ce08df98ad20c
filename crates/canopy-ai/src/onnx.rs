//! ONNX Runtime image classifier.
//!
//! Loads a serialized classification model and pairs its output vector with
//! the label list. Payloads are raw little-endian `f32` tensor bytes in the
//! model's input shape; image decoding happens upstream of this crate.

use std::path::Path;

use canopy_core::ClassificationResult;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::classifier::{Classifier, ClassifyError};

/// Single-input, single-output ONNX classifier.
pub struct OnnxClassifier {
    session: Session,
    labels: Vec<String>,
    /// Per-sample element count, from the model's input shape (batch dim excluded).
    input_len: usize,
    input_shape: Vec<i64>,
}

impl OnnxClassifier {
    /// Load a classifier from `model.onnx` plus its label list.
    ///
    /// The label count must match the model's output width; a mismatch here
    /// would silently misattribute probabilities, so it is fatal.
    pub fn load(model_path: &Path, labels: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(model_path.exists(), "model not found: {model_path:?}");

        let session = Session::builder()?.commit_from_file(model_path)?;

        let input = session
            .inputs()
            .first()
            .ok_or_else(|| anyhow::anyhow!("model declares no inputs"))?;
        let input_shape = tensor_shape(input.dtype())
            .ok_or_else(|| anyhow::anyhow!("model input is not a tensor"))?;
        // Dynamic batch dims come through as -1; a single sample fills them with 1.
        let input_len: usize = input_shape
            .iter()
            .skip(1)
            .map(|&d| if d > 0 { d as usize } else { 1 })
            .product();

        let output = session
            .outputs()
            .first()
            .ok_or_else(|| anyhow::anyhow!("model declares no outputs"))?;
        let output_shape = tensor_shape(output.dtype())
            .ok_or_else(|| anyhow::anyhow!("model output is not a tensor"))?;
        let output_len = output_shape.last().copied().unwrap_or(0);
        anyhow::ensure!(
            output_len == labels.len() as i64,
            "label list has {} entries but model emits {output_len}",
            labels.len()
        );

        info!(
            model = %model_path.display(),
            labels = labels.len(),
            input_len,
            "loaded classifier"
        );
        Ok(Self {
            session,
            labels,
            input_len,
            input_shape,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&mut self, payload: &[u8]) -> Result<ClassificationResult, ClassifyError> {
        let values = decode_f32(payload)?;
        if values.len() != self.input_len {
            return Err(ClassifyError::InvalidPayload(format!(
                "expected {} input values, got {}",
                self.input_len,
                values.len()
            )));
        }

        let mut shape = self.input_shape.clone();
        for d in &mut shape {
            if *d <= 0 {
                *d = 1;
            }
        }

        let tensor = Tensor::from_array((shape, values.into_boxed_slice()))
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifyError::Inference(e.to_string()))?;

        if data.len() != self.labels.len() {
            return Err(ClassifyError::Inference(format!(
                "model emitted {} values for {} labels",
                data.len(),
                self.labels.len()
            )));
        }

        let probs = to_distribution(data);
        Ok(ClassificationResult::new(
            self.labels.iter().cloned().zip(probs).collect(),
        ))
    }
}

/// Raw payload bytes as little-endian f32 values.
fn decode_f32(payload: &[u8]) -> Result<Vec<f32>, ClassifyError> {
    if payload.is_empty() {
        return Err(ClassifyError::InvalidPayload("empty payload".into()));
    }
    if payload.len() % 4 != 0 {
        return Err(ClassifyError::InvalidPayload(format!(
            "payload length {} is not a multiple of 4",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Coerce raw model output into a probability distribution.
///
/// Models exported with a softmax head pass through unchanged; logit outputs
/// get a softmax here.
fn to_distribution(data: &[f32]) -> Vec<f32> {
    let sum: f32 = data.iter().sum();
    let in_range = data.iter().all(|&v| (0.0..=1.0).contains(&v));
    if in_range && (sum - 1.0).abs() < 1e-3 {
        return data.to_vec();
    }
    softmax(data)
}

fn softmax(data: &[f32]) -> Vec<f32> {
    let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = data.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

fn tensor_shape(dtype: &ort::value::ValueType) -> Option<Vec<i64>> {
    match dtype {
        ort::value::ValueType::Tensor { shape, .. } => Some(shape.to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_empty_and_ragged_payloads() {
        assert!(matches!(
            decode_f32(&[]),
            Err(ClassifyError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_f32(&[0, 0, 0]),
            Err(ClassifyError::InvalidPayload(_))
        ));
    }

    #[test]
    fn decode_reads_little_endian() {
        let bytes = 1.5f32.to_le_bytes();
        assert_eq!(decode_f32(&bytes).unwrap(), vec![1.5]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let out = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn distribution_passthrough_when_already_normalized() {
        let probs = [0.2f32, 0.3, 0.5];
        assert_eq!(to_distribution(&probs), probs.to_vec());
    }

    #[test]
    fn logits_get_softmaxed() {
        let out = to_distribution(&[-2.0, 0.0, 4.0]);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
