use serde::{Deserialize, Serialize};

/// Where a late-joining endpoint's trace time zero lands on the session clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOrigin {
    /// Trace time 0 is the moment the endpoint was registered.
    #[default]
    Endpoint,
    /// Trace time is session time. Samples already in the past are
    /// fast-forwarded: only the latest of them is applied.
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Virtual seconds per wall-clock second.
    pub time_scale: f64,
    pub clock_origin: ClockOrigin,
    /// End the session on its own once every trace is exhausted.
    pub stop_when_exhausted: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            clock_origin: ClockOrigin::Endpoint,
            stop_when_exhausted: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("time_scale must be finite and positive, got {0}")]
    TimeScale(f64),
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.time_scale.is_finite() || self.time_scale <= 0.0 {
            return Err(ConfigError::TimeScale(self.time_scale));
        }
        Ok(())
    }
}

/// Optional config fields as they appear in a scenario file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ReplayConfigOverride {
    pub time_scale: Option<f64>,
    pub clock_origin: Option<ClockOrigin>,
    pub stop_when_exhausted: Option<bool>,
}

impl ReplayConfigOverride {
    pub fn apply_to(&self, config: &mut ReplayConfig) {
        if let Some(v) = self.time_scale {
            config.time_scale = v;
        }
        if let Some(v) = self.clock_origin {
            config.clock_origin = v;
        }
        if let Some(v) = self.stop_when_exhausted {
            config.stop_when_exhausted = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_only_touches_present_fields() {
        let mut config = ReplayConfig::default();
        let over = ReplayConfigOverride {
            clock_origin: Some(ClockOrigin::Session),
            ..Default::default()
        };
        over.apply_to(&mut config);
        assert_eq!(config.clock_origin, ClockOrigin::Session);
        assert_eq!(config.time_scale, 1.0);
        assert!(!config.stop_when_exhausted);
    }

    #[test]
    fn rejects_non_positive_time_scale() {
        let config = ReplayConfig {
            time_scale: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TimeScale(0.0)));
        assert!(ReplayConfig::default().validate().is_ok());
    }
}
