use crate::scheduler::Dispatch;
use linkreplay_abstract::{Endpoint, ReplayConfig, Sample};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop` was requested.
    Stopped,
    /// Every trace ran out and the session was configured to end on its own.
    Exhausted,
    /// The session handle went away without stopping.
    Detached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Failed { error: String },
    /// Dropped because the session stopped or the endpoint left first.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActuationRecord {
    /// Global dispatch sequence number; the merged replay order.
    pub seq: u64,
    /// Virtual time the sample was handed to the actuator.
    pub time_ms: u64,
    /// Virtual time the sample was due; earlier than `time_ms` for
    /// fast-forwarded samples.
    pub due_ms: u64,
    pub endpoint: String,
    pub index: usize,
    pub sample: Sample,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointSummary {
    pub name: String,
    pub interface: String,
    pub dispatched: usize,
    pub applied: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub exhausted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub config: ReplayConfig,
    pub actuator: String,
    pub duration_ms: u64,
    pub stop_reason: StopReason,
    pub endpoints: Vec<EndpointSummary>,
    pub timeline: Vec<ActuationRecord>,
}

impl ReplayReport {
    pub fn endpoint(&self, name: &str) -> Option<&EndpointSummary> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    pub fn total_applied(&self) -> usize {
        self.endpoints.iter().map(|e| e.applied).sum()
    }

    pub fn total_failures(&self) -> usize {
        self.endpoints.iter().map(|e| e.failed).sum()
    }

    /// (endpoint, trace timestamp) of every applied sample in replay order.
    pub fn applied_order(&self) -> Vec<(&str, f64)> {
        self.timeline
            .iter()
            .filter(|r| r.outcome == Outcome::Applied)
            .map(|r| (r.endpoint.as_str(), r.sample.timestamp))
            .collect()
    }
}

/// Accumulates per-endpoint counters and the actuation timeline.
#[derive(Debug, Default)]
pub(crate) struct ReportBuilder {
    endpoints: Vec<EndpointSummary>,
    index: HashMap<String, usize>,
    timeline: Vec<ActuationRecord>,
}

impl ReportBuilder {
    pub(crate) fn joined(&mut self, endpoint: &Endpoint, skipped: usize) {
        let summary = self.summary(&endpoint.name);
        summary.interface = endpoint.interface.clone();
        summary.skipped += skipped;
        summary.exhausted = false;
    }

    pub(crate) fn dispatched(&mut self, name: &str) {
        self.summary(name).dispatched += 1;
    }

    pub(crate) fn exhausted(&mut self, name: &str) {
        self.summary(name).exhausted = true;
    }

    pub(crate) fn record(
        &mut self,
        seq: u64,
        dispatch: &Dispatch,
        at: Duration,
        outcome: Outcome,
    ) {
        let summary = self.summary(&dispatch.endpoint.name);
        match &outcome {
            Outcome::Applied => summary.applied += 1,
            Outcome::Failed { .. } => summary.failed += 1,
            Outcome::Cancelled => summary.cancelled += 1,
        }
        self.timeline.push(ActuationRecord {
            seq,
            time_ms: at.as_millis() as u64,
            due_ms: dispatch.due.as_millis() as u64,
            endpoint: dispatch.endpoint.name.clone(),
            index: dispatch.index,
            sample: dispatch.sample,
            outcome,
        });
    }

    pub(crate) fn finish(
        mut self,
        config: ReplayConfig,
        actuator: &str,
        duration: Duration,
        stop_reason: StopReason,
    ) -> ReplayReport {
        self.timeline.sort_by_key(|r| r.seq);
        ReplayReport {
            config,
            actuator: actuator.to_string(),
            duration_ms: duration.as_millis() as u64,
            stop_reason,
            endpoints: self.endpoints,
            timeline: self.timeline,
        }
    }

    fn summary(&mut self, name: &str) -> &mut EndpointSummary {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                self.endpoints.push(EndpointSummary {
                    name: name.to_string(),
                    ..Default::default()
                });
                self.index.insert(name.to_string(), self.endpoints.len() - 1);
                self.endpoints.len() - 1
            }
        };
        &mut self.endpoints[idx]
    }
}
