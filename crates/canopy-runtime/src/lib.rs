//! Concurrency core: counted channels between request handlers and the single
//! inference worker, plus correlation-ID dispatch.

mod channel;
mod dispatch;
mod message;
mod service;
mod worker;

pub use channel::{ChannelClosed, CountedReceiver, CountedSender, PendingCount, counted_channel};
pub use dispatch::{Dispatcher, SubmitError};
pub use message::{Request, Response, Scored, WorkerFailure};
pub use service::Service;
pub use worker::InferenceWorker;
