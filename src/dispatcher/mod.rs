use std::{fmt, sync::Arc};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::engine::{Engine, Query};

mod error;
mod response;

pub use error::DispatchError;
pub use response::{
    channel_name, chunk_response, Inbox, ResponseHeader, ResponseMessage, ResponseRouter, MAX_CHUNK,
};

/// Opaque identity of whoever submitted a query; responses are routed by it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequesterId(pub u64);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded query together with the requester that sent it.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryEnvelope {
    pub requester: RequesterId,
    pub query: Query,
}

impl QueryEnvelope {
    pub fn new(requester: RequesterId, query: Query) -> Self {
        Self { requester, query }
    }
}

/// Producer handle for the shared intake queue.
pub type IntakeSender = mpsc::Sender<QueryEnvelope>;

/// Accepts query envelopes and runs them on a fixed pool of workers.
///
/// ## Flow
/// ```text
/// submit ──► bounded intake ──► worker N ──► spawn_blocking(Engine::execute)
///                                   │
///                                   ▼
///                  ResponseRouter::deliver(requester, result)
///                      header { parts, total_bytes }
///                      chunk 0 .. chunk parts-1
/// ```
///
/// Envelopes run concurrently across workers; slot locks inside the store
/// are the only coordination between them. A failed query is delivered as
/// an `ERROR: ...` text on the same channel as a successful one.
pub struct Dispatcher {
    intake: IntakeSender,
    router: Arc<ResponseRouter>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns `config.workers` workers on the current tokio runtime.
    ///
    /// The config is validated first; a zero worker count or chunk size is
    /// refused here rather than leaving a dispatcher that never answers.
    pub fn start(engine: Arc<Engine>, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (intake, rx) = mpsc::channel(config.intake_capacity);
        let rx = Arc::new(AsyncMutex::new(rx));
        let router = Arc::new(ResponseRouter::new(
            config.outbound_capacity,
            config.max_chunk,
        ));

        let workers = (0..config.workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&engine),
                    Arc::clone(&rx),
                    Arc::clone(&router),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            intake_capacity = config.intake_capacity,
            max_chunk = config.max_chunk,
            "dispatcher started"
        );
        Ok(Self {
            intake,
            router,
            workers,
        })
    }

    pub fn router(&self) -> &Arc<ResponseRouter> {
        &self.router
    }

    /// Claims the response channel of `requester`.
    pub fn subscribe(&self, requester: RequesterId) -> Result<Inbox, DispatchError> {
        self.router.subscribe(requester)
    }

    /// A cloneable producer for the intake queue.
    pub fn intake(&self) -> IntakeSender {
        self.intake.clone()
    }

    /// Queues an envelope, waiting while the intake queue is full.
    ///
    /// The requester must hold an [`Inbox`] from [`subscribe`](Self::subscribe):
    /// its response channel is bounded, and nobody else would drain it.
    /// Envelopes from unsubscribed requesters are refused with
    /// [`DispatchError::NotSubscribed`].
    pub async fn submit(&self, envelope: QueryEnvelope) -> Result<(), DispatchError> {
        if !self.router.is_subscribed(envelope.requester) {
            return Err(DispatchError::NotSubscribed(envelope.requester));
        }
        self.intake
            .send(envelope)
            .await
            .map_err(|_| DispatchError::IntakeClosed)
    }

    /// Closes this dispatcher's intake and waits for the workers to drain
    /// the queue.
    ///
    /// Workers only stop once every [`IntakeSender`] clone is dropped too.
    pub async fn shutdown(self) {
        let Dispatcher {
            intake, workers, ..
        } = self;
        drop(intake);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task failed");
            }
        }
        info!("dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    engine: Arc<Engine>,
    intake: Arc<AsyncMutex<mpsc::Receiver<QueryEnvelope>>>,
    router: Arc<ResponseRouter>,
) {
    loop {
        let next = intake.lock().await.recv().await;
        let Some(QueryEnvelope { requester, query }) = next else {
            break;
        };
        debug!(worker, %requester, kind = query.kind(), "query received");

        // Raw intake senders skip the check in `submit`.
        if !router.is_subscribed(requester) {
            warn!(worker, %requester, "dropping query from unsubscribed requester");
            continue;
        }

        let body = run_query(Arc::clone(&engine), query).await;
        if let Err(e) = router.deliver(requester, &body).await {
            warn!(worker, %requester, error = %e, "response not delivered");
        }
    }
    debug!(worker, "worker stopped");
}

/// Executes on the blocking pool, since slot locks block the thread.
async fn run_query(engine: Arc<Engine>, query: Query) -> String {
    match tokio::task::spawn_blocking(move || engine.execute(&query)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "query failed");
            format!("ERROR: {e}\n")
        }
        Err(e) => {
            error!(error = %e, "query task panicked");
            "ERROR: internal error\n".to_string()
        }
    }
}
