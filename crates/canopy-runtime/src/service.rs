//! Supervisor wiring: one worker, one demux task, one dispatcher handle.

use std::sync::Arc;
use std::time::Duration;

use canopy_ai::Classifier;
use canopy_core::{HierarchyEngine, Taxonomy};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::channel::counted_channel;
use crate::dispatch::Dispatcher;
use crate::worker::InferenceWorker;

/// A running classification service: the inference worker task, the response
/// demux task, and the dispatcher callers submit through.
///
/// Owns the shutdown signal; [`Service::shutdown`] cancels the worker's
/// blocking pop and joins both tasks, so stopping never needs a process
/// kill.
pub struct Service {
    dispatcher: Dispatcher,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    demux: JoinHandle<()>,
}

impl Service {
    /// Start the worker and demux tasks on the current tokio runtime.
    ///
    /// The taxonomy is shared read-only: the dispatcher uses it to validate
    /// priors before enqueueing, the worker's engine to score.
    pub fn start<C>(
        classifier: C,
        taxonomy: Arc<Taxonomy>,
        timeout: Option<Duration>,
    ) -> Self
    where
        C: Classifier + 'static,
    {
        let (request_tx, request_rx) = counted_channel();
        let (response_tx, response_rx) = counted_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let engine = HierarchyEngine::new(taxonomy.clone());
        let worker = InferenceWorker::new(classifier, engine, request_rx, response_tx, shutdown_rx);
        let worker = tokio::spawn(worker.run());

        let dispatcher = Dispatcher::new(request_tx, taxonomy, timeout);
        let demux = dispatcher.spawn_demux(response_rx);

        info!(timeout = ?timeout, "classification service started");
        Self {
            dispatcher,
            shutdown: shutdown_tx,
            worker,
            demux,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop the worker and join both tasks.
    ///
    /// The worker drops its response sender on exit, which drains the demux
    /// task and releases any still-pending waiters.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.worker.await;
        let _ = self.demux.await;
        info!("classification service stopped");
    }
}
