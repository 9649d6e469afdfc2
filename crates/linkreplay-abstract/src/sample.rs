use serde::{Deserialize, Serialize};
use std::fmt;

/// One channel-quality measurement at a point in trace time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the start of the trace.
    pub timestamp: f64,
    /// Link bandwidth in Mbps.
    pub bandwidth: f64,
    /// Packet loss, 0-100 percent.
    pub loss: f64,
    /// One-way delay in ms.
    pub delay: f64,
    /// Queueing latency bound in ms.
    pub latency: f64,
}

impl Sample {
    pub fn new(timestamp: f64, bandwidth: f64, loss: f64, latency: f64, delay: f64) -> Self {
        Self {
            timestamp,
            bandwidth,
            loss,
            delay,
            latency,
        }
    }
}

/// A logical emulated node + interface pair that receives actuation.
///
/// `namespace` names the network namespace the interface lives in, if any.
/// Two endpoints are the same endpoint when their names match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}({}@{})", self.name, self.interface, ns),
            None => write!(f, "{}({})", self.name, self.interface),
        }
    }
}
