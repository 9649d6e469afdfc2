mod log;
mod recording;
pub mod tc;

use linkreplay_abstract::LinkActuator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use log::LogActuator;
pub use recording::{AppliedSample, RecordingActuator};
pub use tc::TcActuator;

/// Backends selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// Shape live interfaces with `tc`.
    #[default]
    Tc,
    /// Dry run: only log what would be applied.
    Log,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown actuator `{0}` (expected `tc` or `log`)")]
pub struct UnknownActuator(String);

impl FromStr for ActuatorKind {
    type Err = UnknownActuator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tc" => Ok(Self::Tc),
            "log" => Ok(Self::Log),
            other => Err(UnknownActuator(other.to_string())),
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tc => write!(f, "tc"),
            Self::Log => write!(f, "log"),
        }
    }
}

impl ActuatorKind {
    pub fn build(self, tc: TcActuator) -> Arc<dyn LinkActuator> {
        match self {
            Self::Tc => Arc::new(tc),
            Self::Log => Arc::new(LogActuator),
        }
    }
}
