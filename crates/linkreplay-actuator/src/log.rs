use linkreplay_abstract::{ActuationError, Endpoint, LinkActuator, Sample};
use tracing::info;

/// Logs every sample instead of touching an interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogActuator;

impl LinkActuator for LogActuator {
    fn apply(&self, endpoint: &Endpoint, sample: &Sample) -> Result<(), ActuationError> {
        info!(
            endpoint = %endpoint,
            t = sample.timestamp,
            bw_mbit = sample.bandwidth,
            loss_pct = sample.loss,
            delay_ms = sample.delay,
            latency_ms = sample.latency,
            "apply"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
