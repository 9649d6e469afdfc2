use crate::scheduler::Dispatch;
use linkreplay_abstract::{ActuationError, LinkActuator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

pub(crate) struct Job {
    pub seq: u64,
    /// Virtual time the job was handed to the worker.
    pub at: Duration,
    pub dispatch: Dispatch,
}

/// What happened to a job. `result` is `None` when the job was cancelled
/// before `apply` began.
pub(crate) struct Completion {
    pub job: Job,
    pub result: Option<Result<(), ActuationError>>,
}

/// Per-endpoint actuation queue.
///
/// Jobs for one endpoint are applied strictly in order; a slow endpoint only
/// ever delays itself.
pub(crate) struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    cancelled: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn spawn(
        actuator: Arc<dyn LinkActuator>,
        stop: watch::Receiver<bool>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        tokio::spawn(run(
            rx,
            actuator,
            stop,
            Arc::clone(&cancelled),
            completions,
        ));
        Self { tx, cancelled }
    }

    /// Queue a job. Returns it back if the worker has already gone away.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|e| e.0)
    }

    /// Cancel every queued job. The worker reports them as cancelled and
    /// exits once its queue is empty.
    pub(crate) fn retire(self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Job>,
    actuator: Arc<dyn LinkActuator>,
    stop: watch::Receiver<bool>,
    cancelled: Arc<AtomicBool>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    while let Some(job) = rx.recv().await {
        let result = if *stop.borrow() || cancelled.load(Ordering::Acquire) {
            debug!(endpoint = %job.dispatch.endpoint, index = job.dispatch.index, "cancelled before apply");
            None
        } else if actuator.is_blocking() {
            let actuator = Arc::clone(&actuator);
            let endpoint = job.dispatch.endpoint.clone();
            let sample = job.dispatch.sample;
            let outcome =
                tokio::task::spawn_blocking(move || actuator.apply(&endpoint, &sample)).await;
            Some(outcome.unwrap_or_else(|e| {
                Err(ActuationError::Rejected {
                    endpoint: job.dispatch.endpoint.name.clone(),
                    reason: format!("actuation task failed: {e}"),
                })
            }))
        } else {
            Some(actuator.apply(&job.dispatch.endpoint, &job.dispatch.sample))
        };

        if completions.send(Completion { job, result }).is_err() {
            break;
        }
    }
}
