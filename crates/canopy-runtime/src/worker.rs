//! The single long-running inference loop.
//!
//! Exactly one worker owns the classifier and the hierarchy engine; it
//! consumes requests sequentially, so at most one inference runs at a time
//! and one model instance bounds resource usage. Per-request failures are
//! converted into error-tagged responses; only shutdown or channel closure
//! ends the loop.

use canopy_ai::Classifier;
use canopy_core::HierarchyEngine;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::{CountedReceiver, CountedSender};
use crate::message::{Request, Response, Scored, WorkerFailure};

pub struct InferenceWorker<C: Classifier> {
    classifier: C,
    engine: HierarchyEngine,
    input: CountedReceiver<Request>,
    output: CountedSender<Response>,
    shutdown: watch::Receiver<bool>,
}

impl<C: Classifier> InferenceWorker<C> {
    pub fn new(
        classifier: C,
        engine: HierarchyEngine,
        input: CountedReceiver<Request>,
        output: CountedSender<Response>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            classifier,
            engine,
            input,
            output,
            shutdown,
        }
    }

    /// Run until the shutdown signal fires or a channel closes.
    ///
    /// The blocking `pop` is raced against the shutdown watch so the task can
    /// be joined instead of killed.
    pub async fn run(mut self) {
        info!("inference worker started");
        loop {
            let request = tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("inference worker received shutdown signal");
                    break;
                }
                popped = self.input.pop() => match popped {
                    Ok(request) => request,
                    Err(_) => {
                        info!("request channel closed, inference worker exiting");
                        break;
                    }
                },
            };

            let correlation_id = request.correlation_id;
            debug!(
                correlation_id,
                payload_bytes = request.payload.len(),
                pending = self.input.len(),
                "processing request"
            );

            let outcome = self.process(&request);
            if let Err(failure) = &outcome {
                warn!(correlation_id, %failure, "request failed");
            }

            let response = Response {
                outcome,
                correlation_id,
            };
            if self.output.push(response).is_err() {
                warn!(correlation_id, "response channel closed, dropping result");
                break;
            }
        }
    }

    fn process(&mut self, request: &Request) -> Result<Scored, WorkerFailure> {
        let result = self.classifier.classify(&request.payload)?;
        let hierarchy = self.engine.compute(&result, &request.priors)?;
        Ok(Scored { result, hierarchy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::counted_channel;
    use canopy_ai::ClassifyError;
    use canopy_core::{ClassificationResult, HierarchyNode, Taxonomy};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Scores the payload's first byte as the "cat" probability (0–255 → 0–1);
    /// a payload starting with 0xFF fails.
    struct ByteClassifier;

    impl Classifier for ByteClassifier {
        fn classify(&mut self, payload: &[u8]) -> Result<ClassificationResult, ClassifyError> {
            match payload.first() {
                None => Err(ClassifyError::InvalidPayload("empty payload".into())),
                Some(0xFF) => Err(ClassifyError::Inference("model exploded".into())),
                Some(&b) => Ok(ClassificationResult::new(vec![(
                    "cat".into(),
                    b as f32 / 255.0,
                )])),
            }
        }
    }

    fn engine() -> HierarchyEngine {
        let taxonomy = Taxonomy::build(
            vec!["cat".into()],
            vec![
                HierarchyNode {
                    id: "animal".into(),
                    label: "animal".into(),
                    parent: None,
                    prior: 1.0,
                },
                HierarchyNode {
                    id: "cat".into(),
                    label: "cat".into(),
                    parent: Some("animal".into()),
                    prior: 1.0,
                },
            ],
        )
        .unwrap();
        HierarchyEngine::new(Arc::new(taxonomy))
    }

    fn request(payload: Vec<u8>, correlation_id: u64) -> Request {
        Request {
            payload,
            priors: HashMap::new(),
            correlation_id,
        }
    }

    #[tokio::test]
    async fn scores_requests_in_order() {
        let (req_tx, req_rx) = counted_channel();
        let (resp_tx, mut resp_rx) = counted_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = InferenceWorker::new(ByteClassifier, engine(), req_rx, resp_tx, shutdown_rx);
        let task = tokio::spawn(worker.run());

        req_tx.push(request(vec![255u8 / 5], 1)).unwrap();
        req_tx.push(request(vec![255u8], 2)).unwrap();
        req_tx.push(request(vec![255u8 / 3], 3)).unwrap();

        let first = resp_rx.pop().await.unwrap();
        assert_eq!(first.correlation_id, 1);
        let scored = first.outcome.unwrap();
        assert!((scored.hierarchy["cat"] - 0.2).abs() < 1e-2);
        assert!((scored.hierarchy["animal"] - 0.2).abs() < 1e-2);

        // Failure in the middle does not kill the loop.
        let second = resp_rx.pop().await.unwrap();
        assert_eq!(second.correlation_id, 2);
        assert!(matches!(
            second.outcome,
            Err(WorkerFailure::Inference(_))
        ));

        let third = resp_rx.pop().await.unwrap();
        assert_eq!(third.correlation_id, 3);
        assert!(third.outcome.is_ok());

        drop(req_tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should exit when input closes")
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_payload_tagged_as_validation_failure() {
        let (req_tx, req_rx) = counted_channel();
        let (resp_tx, mut resp_rx) = counted_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = InferenceWorker::new(ByteClassifier, engine(), req_rx, resp_tx, shutdown_rx);
        tokio::spawn(worker.run());

        req_tx.push(request(vec![], 9)).unwrap();
        let response = resp_rx.pop().await.unwrap();
        assert_eq!(response.correlation_id, 9);
        assert!(matches!(
            response.outcome,
            Err(WorkerFailure::InvalidPayload(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_signal_joins_the_task() {
        let (req_tx, req_rx) = counted_channel();
        let (resp_tx, _resp_rx) = counted_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = InferenceWorker::new(ByteClassifier, engine(), req_rx, resp_tx, shutdown_rx);
        let task = tokio::spawn(worker.run());

        // Worker is idle, blocked in pop; the signal must still cancel it.
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should join after shutdown")
            .unwrap();
        drop(req_tx);
    }
}
