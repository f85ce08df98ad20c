//! Correlation-ID dispatch between request handlers and the worker.
//!
//! Every submit registers a one-shot waiter keyed by a fresh correlation ID
//! before its request is pushed; a demux task pops the shared response
//! channel and completes exactly the matching waiter. Matching is always by
//! ID, never by position, so reordered completions (or a future multi-worker
//! setup) deliver correctly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use canopy_core::{NodeId, PriorError, Taxonomy};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{CountedReceiver, CountedSender};
use crate::message::{Request, Response, Scored, WorkerFailure};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Rejected before any channel traffic; 4xx-equivalent.
    #[error("invalid priors: {0}")]
    InvalidPriors(#[from] PriorError),

    /// The worker reported a failure for this request; the carried
    /// [`WorkerFailure`] distinguishes payload validation from model errors.
    #[error(transparent)]
    Worker(#[from] WorkerFailure),

    /// The request channel is closed; nothing was enqueued.
    #[error("request channel closed")]
    ChannelClosed,

    /// No response arrived: the wait timed out or the response channel was
    /// torn down with this request still in flight.
    #[error("inference worker unavailable")]
    WorkerUnavailable,
}

type WaiterMap = Mutex<HashMap<u64, oneshot::Sender<Response>>>;

/// Cheap-to-clone handle used by every request-handling context.
#[derive(Clone)]
pub struct Dispatcher {
    input: CountedSender<Request>,
    taxonomy: Arc<Taxonomy>,
    waiters: Arc<WaiterMap>,
    next_id: Arc<AtomicU64>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// `timeout` bounds each submit's wait; `None` waits until the response
    /// channel resolves or closes.
    pub fn new(
        input: CountedSender<Request>,
        taxonomy: Arc<Taxonomy>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            input,
            taxonomy,
            waiters: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            timeout,
        }
    }

    /// Spawn the demultiplexing task that owns the response channel.
    ///
    /// Must be running for submits to complete. When the channel closes, all
    /// registered waiters are dropped so pending submits resolve with
    /// [`SubmitError::WorkerUnavailable`] instead of hanging.
    pub fn spawn_demux(&self, output: CountedReceiver<Response>) -> JoinHandle<()> {
        let waiters = self.waiters.clone();
        tokio::spawn(demux(output, waiters))
    }

    /// Number of requests enqueued but not yet consumed by the worker.
    ///
    /// The channel itself is unbounded; callers wanting backpressure cap
    /// their in-flight submits using this.
    pub fn queued(&self) -> usize {
        self.input.len()
    }

    /// Classify one payload and wait for its hierarchy-scored response.
    pub async fn submit(
        &self,
        payload: Vec<u8>,
        priors: HashMap<NodeId, f64>,
    ) -> Result<Scored, SubmitError> {
        self.taxonomy.validate_priors(&priors)?;

        let correlation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_waiters().insert(correlation_id, tx);

        let request = Request {
            payload,
            priors,
            correlation_id,
        };
        if self.input.push(request).is_err() {
            self.lock_waiters().remove(&correlation_id);
            return Err(SubmitError::ChannelClosed);
        }
        debug!(correlation_id, queued = self.input.len(), "request enqueued");

        let response = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => return Err(SubmitError::WorkerUnavailable),
                Err(_) => {
                    // A late response will find no waiter; the demux task
                    // logs and drops it.
                    self.lock_waiters().remove(&correlation_id);
                    warn!(correlation_id, "timed out waiting for worker");
                    return Err(SubmitError::WorkerUnavailable);
                }
            },
            None => rx.await.map_err(|_| SubmitError::WorkerUnavailable)?,
        };

        debug_assert_eq!(response.correlation_id, correlation_id);
        Ok(response.outcome?)
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Response>>> {
        // A poisoned table only means some task panicked mid-update; the map
        // itself is still usable, and panicking here would take the request
        // task down with it.
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn demux(mut output: CountedReceiver<Response>, waiters: Arc<WaiterMap>) {
    loop {
        let response = match output.pop().await {
            Ok(response) => response,
            Err(_) => break,
        };
        let waiter = waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&response.correlation_id);
        match waiter {
            // The waiter may have timed out between demux pop and delivery;
            // a failed send is not an error.
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!(
                correlation_id = response.correlation_id,
                "response with no waiter (timed out or never registered)"
            ),
        }
    }

    let mut waiters = waiters.lock().unwrap_or_else(|e| e.into_inner());
    if !waiters.is_empty() {
        warn!(
            pending = waiters.len(),
            "response channel closed with requests in flight"
        );
    }
    // Dropping the senders resolves every pending submit with
    // WorkerUnavailable.
    waiters.clear();
}
