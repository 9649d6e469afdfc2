use linkreplay_abstract::{ActuationError, Endpoint, LinkActuator, Sample};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedSample {
    pub endpoint: String,
    pub sample: Sample,
}

/// In-memory actuator that remembers every successful apply.
///
/// Endpoints named with [`fail_for`](Self::fail_for) reject every sample.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    applied: Mutex<Vec<AppliedSample>>,
    failing: HashSet<String>,
    blocking: bool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(mut self, endpoint: impl Into<String>) -> Self {
        self.failing.insert(endpoint.into());
        self
    }

    /// Report `apply` as blocking so the engine drives it from the
    /// blocking pool.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn records(&self) -> Vec<AppliedSample> {
        self.lock().clone()
    }

    /// (endpoint, trace timestamp) in the order samples were applied.
    pub fn order(&self) -> Vec<(String, f64)> {
        self.lock()
            .iter()
            .map(|r| (r.endpoint.clone(), r.sample.timestamp))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AppliedSample>> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkActuator for RecordingActuator {
    fn apply(&self, endpoint: &Endpoint, sample: &Sample) -> Result<(), ActuationError> {
        if self.failing.contains(&endpoint.name) {
            return Err(ActuationError::Rejected {
                endpoint: endpoint.name.clone(),
                reason: "injected failure".to_string(),
            });
        }
        self.lock().push(AppliedSample {
            endpoint: endpoint.name.clone(),
            sample: *sample,
        });
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_applies_and_injects_failures() {
        let recorder = RecordingActuator::new().fail_for("sta2");
        let sta1 = Endpoint::new("sta1", "mon0");
        let sta2 = Endpoint::new("sta2", "mon0");
        let sample = Sample::new(1.5, 2.0, 0.5, 10.0, 5.0);

        recorder.apply(&sta1, &sample).unwrap();
        let err = recorder.apply(&sta2, &sample).unwrap_err();
        assert!(err.to_string().contains("sta2"));

        assert_eq!(recorder.order(), vec![("sta1".to_string(), 1.5)]);
        assert_eq!(recorder.records()[0].sample, sample);
        recorder.clear();
        assert!(recorder.records().is_empty());
    }
}
