use crate::config::ReplayConfigOverride;
use crate::sample::Endpoint;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct ReplayScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: ReplayConfigOverride,
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    pub assertions: Vec<ReplayAssertion>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EndpointSpec {
    pub name: String,
    pub interface: String,
    pub namespace: Option<String>,
    /// Trace file, relative paths resolve against the scenario file.
    pub trace: PathBuf,
    /// Register the endpoint this long after the session starts.
    pub join_after_ms: Option<u64>,
}

impl EndpointSpec {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            name: self.name.clone(),
            interface: self.interface.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayAssertion {
    /// At least `count` samples were applied to `endpoint`.
    AppliedAtLeast { endpoint: String, count: usize },
    /// No more than `count` actuations failed across all endpoints.
    MaxFailures { count: usize },
    /// Replay finished within `ms` of virtual time.
    MaxDuration { ms: u64 },
}
