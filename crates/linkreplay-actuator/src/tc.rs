//! Link shaping with Linux `tc`.
//!
//! Each sample becomes two qdiscs on the endpoint's interface: a TBF root that
//! enforces the bandwidth (its `latency` is the sample's latency) and a netem
//! child carrying delay and loss. `tc qdisc replace` makes repeated applies
//! idempotent.

use linkreplay_abstract::{ActuationError, Endpoint, LinkActuator, Sample};
use std::process::Command;
use tracing::debug;

/// One process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TcCommand {
    fn display(&self) -> String {
        let mut s = self.program.clone();
        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

#[derive(Debug, Clone)]
pub struct TcActuator {
    tc: String,
    sudo: bool,
}

impl Default for TcActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl TcActuator {
    pub fn new() -> Self {
        Self {
            tc: "tc".to_string(),
            sudo: false,
        }
    }

    /// Path to the `tc` binary.
    pub fn tc_path(mut self, path: impl Into<String>) -> Self {
        self.tc = path.into();
        self
    }

    /// Prefix every command with `sudo`.
    pub fn sudo(mut self, enabled: bool) -> Self {
        self.sudo = enabled;
        self
    }

    /// The commands that apply `sample` to `endpoint`, in order.
    pub fn commands(&self, endpoint: &Endpoint, sample: &Sample) -> Vec<TcCommand> {
        let iface = endpoint.interface.as_str();

        let rate_kbit = ((sample.bandwidth * 1000.0).round() as u64).max(1);
        // At least one MTU-sized burst.
        let burst = (rate_kbit.saturating_mul(1000) / 8).max(15400) / 10;
        let latency_ms = sample.latency.max(1.0);

        let tbf = [
            "qdisc", "replace", "dev", iface, "root", "handle", "1:", "tbf", "rate",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([
            format!("{rate_kbit}kbit"),
            "burst".to_string(),
            burst.to_string(),
            "latency".to_string(),
            format!("{latency_ms}ms"),
        ])
        .collect();

        let netem = [
            "qdisc", "replace", "dev", iface, "parent", "1:1", "handle", "10:", "netem", "delay",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([
            format!("{}ms", sample.delay),
            "loss".to_string(),
            format!("{}%", sample.loss),
        ])
        .collect();

        vec![self.wrap(endpoint, tbf), self.wrap(endpoint, netem)]
    }

    fn wrap(&self, endpoint: &Endpoint, tc_args: Vec<String>) -> TcCommand {
        let mut argv: Vec<String> = Vec::new();
        if self.sudo {
            argv.push("sudo".to_string());
        }
        if let Some(ns) = &endpoint.namespace {
            argv.extend(["ip", "netns", "exec", ns.as_str()].map(String::from));
        }
        argv.push(self.tc.clone());
        argv.extend(tc_args);

        let program = argv.remove(0);
        TcCommand {
            program,
            args: argv,
        }
    }

    fn run(&self, endpoint: &Endpoint, command: &TcCommand) -> Result<(), ActuationError> {
        debug!(endpoint = %endpoint, "{}", command.display());
        let output = Command::new(&command.program)
            .args(&command.args)
            .output()
            .map_err(|source| ActuationError::Spawn {
                endpoint: endpoint.name.clone(),
                program: command.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ActuationError::CommandFailed {
                endpoint: endpoint.name.clone(),
                command: command.display(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl LinkActuator for TcActuator {
    fn apply(&self, endpoint: &Endpoint, sample: &Sample) -> Result<(), ActuationError> {
        for command in self.commands(endpoint, sample) {
            self.run(endpoint, &command)?;
        }
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "tc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(c: &TcCommand) -> String {
        c.display()
    }

    #[test]
    fn builds_tbf_and_netem_commands() {
        let sample = Sample::new(0.0, 1.5, 0.5, 10.0, 5.0);
        let commands = TcActuator::new().commands(&Endpoint::new("sta1", "sta1-wlan0"), &sample);
        assert_eq!(commands.len(), 2);
        assert_eq!(
            joined(&commands[0]),
            "tc qdisc replace dev sta1-wlan0 root handle 1: tbf rate 1500kbit burst 18750 latency 10ms"
        );
        assert_eq!(
            joined(&commands[1]),
            "tc qdisc replace dev sta1-wlan0 parent 1:1 handle 10: netem delay 5ms loss 0.5%"
        );
    }

    #[test]
    fn runs_inside_namespace_with_sudo() {
        let endpoint = Endpoint::new("sta1", "wlan0").in_namespace("mn-sta1");
        let sample = Sample::new(0.0, 80.0, 0.0, 0.0, 0.0);
        let commands = TcActuator::new()
            .sudo(true)
            .tc_path("/sbin/tc")
            .commands(&endpoint, &sample);

        let root = &commands[0];
        assert_eq!(root.program, "sudo");
        assert_eq!(
            &root.args[..5],
            &["ip", "netns", "exec", "mn-sta1", "/sbin/tc"].map(String::from)
        );
        assert!(joined(root).ends_with("rate 80000kbit burst 1000000 latency 1ms"));
    }

    #[test]
    fn zero_bandwidth_still_yields_a_valid_rate() {
        let sample = Sample::new(0.0, 0.0, 100.0, 0.0, 0.0);
        let commands = TcActuator::new().commands(&Endpoint::new("sta1", "mon0"), &sample);
        assert!(joined(&commands[0]).contains("rate 1kbit"));
        assert!(joined(&commands[1]).ends_with("loss 100%"));
    }

    #[test]
    fn huge_bandwidth_saturates_rate_and_burst() {
        let sample = Sample::new(0.0, 1e30, 0.0, 1.0, 1.0);
        let commands = TcActuator::new().commands(&Endpoint::new("sta1", "mon0"), &sample);
        let expected = format!("rate {}kbit burst {}", u64::MAX, u64::MAX / 8 / 10);
        assert!(joined(&commands[0]).contains(&expected), "{}", joined(&commands[0]));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let actuator = TcActuator::new().tc_path("/nonexistent/linkreplay-tc");
        let err = actuator
            .apply(
                &Endpoint::new("sta1", "mon0"),
                &Sample::new(0.0, 1.0, 0.0, 1.0, 1.0),
            )
            .unwrap_err();
        assert!(matches!(err, ActuationError::Spawn { ref endpoint, .. } if endpoint == "sta1"));
    }
}
