use crate::error::ReplayError;
use crate::report::{Outcome, ReplayReport, ReportBuilder, StopReason};
use crate::scheduler::Scheduler;
use crate::trace::Trace;
use linkreplay_abstract::{Endpoint, LinkActuator, ReplayConfig};
use std::time::Duration;
use tracing::{info, warn};

/// Push every trace through `actuator` immediately, in merged replay order,
/// without waiting for the wall clock.
///
/// Useful to validate traces and actuator wiring before a live run. All
/// endpoints start at virtual time 0.
pub fn replay_offline(
    config: &ReplayConfig,
    endpoints: Vec<(Endpoint, Trace)>,
    actuator: &dyn LinkActuator,
) -> Result<ReplayReport, ReplayError> {
    config.validate()?;
    if endpoints.is_empty() {
        return Err(ReplayError::EmptySession);
    }

    let mut scheduler = Scheduler::new();
    let mut report = ReportBuilder::default();
    for (endpoint, trace) in endpoints {
        let empty = trace.is_empty();
        let registration = scheduler.register(endpoint.clone(), trace, Duration::ZERO, Duration::ZERO)?;
        report.joined(&endpoint, registration.skipped);
        if empty {
            report.exhausted(&endpoint.name);
        }
    }

    let mut seq = 0;
    while let Some(dispatch) = scheduler.step() {
        let name = &dispatch.endpoint.name;
        report.dispatched(name);
        if dispatch.last {
            report.exhausted(name);
        }
        let outcome = match actuator.apply(&dispatch.endpoint, &dispatch.sample) {
            Ok(()) => Outcome::Applied,
            Err(e) => {
                warn!(endpoint = %dispatch.endpoint, index = dispatch.index, error = %e, "actuation failed");
                Outcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        report.record(seq, &dispatch, dispatch.due, outcome);
        seq += 1;
    }

    let duration = scheduler.current_time();
    info!(
        dispatched = seq,
        duration_ms = duration.as_millis() as u64,
        "offline replay complete"
    );
    Ok(report.finish(
        config.clone(),
        actuator.name(),
        duration,
        StopReason::Exhausted,
    ))
}
