use crate::sample::{Endpoint, Sample};

/// Failure to apply a sample to a live interface.
///
/// Always recoverable from the replay engine's point of view: the event is
/// recorded and replay carries on with the next one.
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
    #[error("failed to spawn `{program}` for {endpoint}: {source}")]
    Spawn {
        endpoint: String,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed for {endpoint}: {stderr}")]
    CommandFailed {
        endpoint: String,
        command: String,
        stderr: String,
    },
    #[error("sample rejected for {endpoint}: {reason}")]
    Rejected { endpoint: String, reason: String },
    #[error("endpoint {endpoint} is not available")]
    Unavailable { endpoint: String },
}

/// The capability the emulation layer exposes to the replay engine.
///
/// `apply` sets the interface's bandwidth, loss, delay and latency to the
/// values in `sample`, effective immediately. Applying the same sample twice
/// must leave the interface in the same state.
pub trait LinkActuator: Send + Sync + 'static {
    fn apply(&self, endpoint: &Endpoint, sample: &Sample) -> Result<(), ActuationError>;

    /// Whether `apply` may block the calling thread (e.g. it spawns a process).
    /// Blocking actuators are driven from the blocking thread pool.
    fn is_blocking(&self) -> bool {
        false
    }

    /// Short name used in logs and reports.
    fn name(&self) -> &str {
        "actuator"
    }
}

impl<T: LinkActuator + ?Sized> LinkActuator for std::sync::Arc<T> {
    fn apply(&self, endpoint: &Endpoint, sample: &Sample) -> Result<(), ActuationError> {
        (**self).apply(endpoint, sample)
    }

    fn is_blocking(&self) -> bool {
        (**self).is_blocking()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
