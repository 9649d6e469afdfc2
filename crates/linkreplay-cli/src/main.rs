use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Level, info, warn};

use linkreplay_abstract::{EndpointSpec, ReplayConfigOverride, ReplayScenario};
use linkreplay_actuator::{ActuatorKind, TcActuator};
use linkreplay_engine::scenario_runner::{self, RunOptions};
use linkreplay_engine::{Outcome, ReplayReport};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay recorded link conditions onto live interfaces")]
struct Args {
    /// Scenario TOML describing endpoints, traces and assertions.
    #[arg(long, conflicts_with = "endpoint")]
    scenario: Option<PathBuf>,

    /// Ad hoc endpoint, `NAME:IFACE[@NETNS]=TRACE`. Repeatable.
    #[arg(long, value_parser = parse_endpoint)]
    endpoint: Vec<EndpointSpec>,

    /// Backend used to apply samples.
    #[arg(long, default_value_t = ActuatorKind::Tc)]
    actuator: ActuatorKind,

    /// Run `tc` through sudo.
    #[arg(long, default_value_t = false)]
    sudo: bool,

    /// Push every sample through the actuator immediately instead of in
    /// real time.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Virtual seconds per wall-clock second.
    #[arg(long)]
    time_scale: Option<f64>,

    /// Exit once every trace has been replayed.
    #[arg(long, default_value_t = false)]
    stop_when_exhausted: bool,

    /// Write the JSON replay report here.
    #[arg(long)]
    report_out: Option<PathBuf>,

    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    info!("linkreplay starting...");

    let (scenario, base) = args.scenario()?;
    let actuator = args.actuator.build(TcActuator::new().sudo(args.sudo));
    let mut options = RunOptions::new(actuator);
    options.offline = args.offline;
    options.overrides = ReplayConfigOverride {
        time_scale: args.time_scale,
        clock_origin: None,
        stop_when_exhausted: args.stop_when_exhausted.then_some(true),
    };

    let report =
        scenario_runner::execute_scenario(&scenario, &base, options, shutdown_signal()).await?;
    print_summary(&report);

    if let Some(path) = &args.report_out {
        write_report(path, &report)?;
    }

    scenario_runner::check_assertions(&scenario.assertions, &report)?;
    if !scenario.assertions.is_empty() {
        info!("Scenario {} passed", scenario.name);
    }
    Ok(())
}

impl Args {
    /// The scenario to run and the directory its trace paths are relative to.
    fn scenario(&self) -> Result<(ReplayScenario, PathBuf)> {
        if let Some(path) = &self.scenario {
            let scenario = scenario_runner::load_scenario(path)?;
            let base = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            return Ok((scenario, base));
        }
        if self.endpoint.is_empty() {
            bail!("either --scenario or at least one --endpoint is required");
        }
        let scenario = ReplayScenario {
            name: "ad-hoc".to_string(),
            description: String::new(),
            config: ReplayConfigOverride::default(),
            endpoints: self.endpoint.clone(),
            assertions: Vec::new(),
        };
        Ok((scenario, PathBuf::new()))
    }
}

fn parse_endpoint(s: &str) -> Result<EndpointSpec, String> {
    let (target, trace) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME:IFACE[@NETNS]=TRACE, got `{s}`"))?;
    let (name, rest) = target
        .split_once(':')
        .ok_or_else(|| format!("missing `:IFACE` in `{s}`"))?;
    let (interface, namespace) = match rest.split_once('@') {
        Some((iface, ns)) => (iface, Some(ns)),
        None => (rest, None),
    };
    if name.is_empty() || interface.is_empty() || trace.is_empty() {
        return Err(format!("empty name, interface or trace in `{s}`"));
    }
    if namespace.is_some_and(str::is_empty) {
        return Err(format!("empty namespace in `{s}`"));
    }
    Ok(EndpointSpec {
        name: name.to_string(),
        interface: interface.to_string(),
        namespace: namespace.map(str::to_string),
        trace: PathBuf::from(trace),
        join_after_ms: None,
    })
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn print_summary(report: &ReplayReport) {
    info!(
        "Replay finished after {} ms ({:?}) using {}",
        report.duration_ms, report.stop_reason, report.actuator
    );
    for e in &report.endpoints {
        info!(
            "  {} ({}): applied {}, failed {}, cancelled {}, skipped {}{}",
            e.name,
            e.interface,
            e.applied,
            e.failed,
            e.cancelled,
            e.skipped,
            if e.exhausted { ", exhausted" } else { "" }
        );
    }
    if let Some(last) = report
        .timeline
        .iter()
        .rev()
        .find(|r| matches!(r.outcome, Outcome::Failed { .. }))
        && let Outcome::Failed { error } = &last.outcome
    {
        warn!("Last failure: {}", error);
    }
}

fn write_report(path: &Path, report: &ReplayReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize replay report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint_with_namespace() {
        let spec = parse_endpoint("sta1:sta1-wlan0@mn-sta1=traces/clientTrace.txt").unwrap();
        assert_eq!(spec.name, "sta1");
        assert_eq!(spec.interface, "sta1-wlan0");
        assert_eq!(spec.namespace.as_deref(), Some("mn-sta1"));
        assert_eq!(spec.trace, PathBuf::from("traces/clientTrace.txt"));
    }

    #[test]
    fn parses_endpoint_without_namespace() {
        let spec = parse_endpoint("sta2:mon0=serverTrace.txt").unwrap();
        assert_eq!(spec.interface, "mon0");
        assert!(spec.namespace.is_none());
    }

    #[test]
    fn rejects_malformed_endpoints() {
        for bad in ["sta1", "sta1:mon0", "sta1=trace.txt", ":mon0=t", "sta1:mon0@=t", "sta1:mon0="] {
            assert!(parse_endpoint(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn scenario_and_endpoint_are_exclusive() {
        let result = Args::try_parse_from([
            "linkreplay",
            "--scenario",
            "replay.toml",
            "--endpoint",
            "sta1:mon0=t.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn builds_ad_hoc_scenario_from_endpoints() {
        let args = Args::try_parse_from([
            "linkreplay",
            "--endpoint",
            "sta1:mon0=a.txt",
            "--endpoint",
            "sta2:mon1@ns2=b.txt",
            "--actuator",
            "log",
            "--time-scale",
            "4",
        ])
        .unwrap();
        assert_eq!(args.actuator, ActuatorKind::Log);
        assert_eq!(args.time_scale, Some(4.0));

        let (scenario, base) = args.scenario().unwrap();
        assert_eq!(scenario.endpoints.len(), 2);
        assert_eq!(scenario.endpoints[1].namespace.as_deref(), Some("ns2"));
        assert_eq!(base, PathBuf::new());
    }

    #[test]
    fn needs_scenario_or_endpoint() {
        let args = Args::try_parse_from(["linkreplay"]).unwrap();
        assert!(args.scenario().is_err());
    }
}
