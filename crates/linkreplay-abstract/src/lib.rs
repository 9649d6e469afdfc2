pub mod config;
pub mod interface;
pub mod sample;
pub mod scenario;

pub use interface::{ActuationError, LinkActuator};
pub use sample::{Endpoint, Sample};

pub use config::{ClockOrigin, ConfigError, ReplayConfig, ReplayConfigOverride};
pub use scenario::{EndpointSpec, ReplayAssertion, ReplayScenario};
