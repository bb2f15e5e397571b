use crate::errors::{AppError, AppResult};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};

type LaneFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type LaneJob = Box<dyn FnOnce() -> LaneFuture + Send>;

/// Single-worker executor. Jobs run one at a time in submission order, so at
/// most one store call is ever outstanding per lane.
#[derive(Clone)]
pub struct WorkerLane {
    name: &'static str,
    sender: mpsc::UnboundedSender<LaneJob>,
}

impl WorkerLane {
    /// Spawns the worker on the current tokio runtime.
    pub fn start(name: &'static str) -> AppResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| AppError::Internal(format!("worker lane {name} requires a tokio runtime")))?;
        let (sender, receiver) = mpsc::unbounded_channel::<LaneJob>();
        handle.spawn(run_loop(name, receiver));

        Ok(Self { name, sender })
    }

    pub fn submit<F, Fut>(&self, job: F) -> AppResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: LaneJob = Box::new(move || Box::pin(job()) as LaneFuture);
        self.sender
            .send(boxed)
            .map_err(|_| AppError::Internal(format!("worker lane {} has stopped", self.name)))
    }

    /// Resolves once every job submitted before this call has finished.
    pub async fn flush(&self) -> AppResult<()> {
        let (done, wait) = oneshot::channel::<()>();
        self.submit(move || async move {
            let _ = done.send(());
        })?;
        wait.await
            .map_err(|_| AppError::Internal(format!("worker lane {} dropped a barrier", self.name)))
    }
}

async fn run_loop(name: &'static str, mut receiver: mpsc::UnboundedReceiver<LaneJob>) {
    while let Some(job) = receiver.recv().await {
        // A panicking job must not take the lane down with it.
        if let Err(error) = tokio::spawn(job()).await {
            tracing::error!(lane = name, error = %error, "worker lane job aborted");
        }
    }
    tracing::debug!(lane = name, "worker lane stopped");
}

/// Runs a blocking store call off the async worker threads.
pub async fn run_blocking<T, F>(call: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|error| AppError::Internal(format!("blocking store call failed: {error}")))?
}
