use crate::clock::wall_span;
use crate::offline::replay_offline;
use crate::report::ReplayReport;
use crate::session::{EndpointRegistry, ReplaySession};
use crate::trace::{Trace, TraceReader};
use anyhow::{Context, anyhow, bail};
use linkreplay_abstract::{
    Endpoint, LinkActuator, ReplayAssertion, ReplayConfig, ReplayConfigOverride, ReplayScenario,
};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};

/// How to execute a scenario.
pub struct RunOptions {
    pub actuator: Arc<dyn LinkActuator>,
    pub reader: TraceReader,
    /// Applied on top of the scenario's own config.
    pub overrides: ReplayConfigOverride,
    /// Replay instantly instead of against the wall clock.
    pub offline: bool,
}

impl RunOptions {
    pub fn new(actuator: Arc<dyn LinkActuator>) -> Self {
        Self {
            actuator,
            reader: TraceReader::new(),
            overrides: ReplayConfigOverride::default(),
            offline: false,
        }
    }
}

pub fn load_scenario(path: &Path) -> anyhow::Result<ReplayScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).context("Failed to parse scenario")
}

/// Effective config: defaults, then the scenario, then `overrides`.
pub fn scenario_config(scenario: &ReplayScenario, overrides: &ReplayConfigOverride) -> ReplayConfig {
    let mut config = ReplayConfig::default();
    scenario.config.apply_to(&mut config);
    overrides.apply_to(&mut config);
    config
}

struct LoadedEndpoint {
    endpoint: Endpoint,
    trace: Trace,
    join_after: Option<Duration>,
}

/// Load the scenario at `path`, replay it and check its assertions.
///
/// A live run ends when every trace is exhausted (if so configured), when
/// a `max_duration` assertion's time is reached, or when `shutdown` resolves.
pub async fn run_scenario(
    path: &Path,
    options: RunOptions,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<ReplayReport> {
    let scenario = load_scenario(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let report = execute_scenario(&scenario, base, options, shutdown).await?;
    check_assertions(&scenario.assertions, &report)?;
    info!("Scenario {} passed", scenario.name);
    Ok(report)
}

/// Replay an already parsed scenario without checking its assertions.
/// Relative trace paths resolve against `base`.
pub async fn execute_scenario(
    scenario: &ReplayScenario,
    base: &Path,
    options: RunOptions,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<ReplayReport> {
    info!("Running Scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("Description: {}", scenario.description);
    }

    let config = scenario_config(scenario, &options.overrides);
    let endpoints = load_endpoints(scenario, base, &options.reader)?;

    let report = if options.offline {
        let pairs = endpoints
            .into_iter()
            .map(|e| {
                if e.join_after.is_some() {
                    warn!(endpoint = %e.endpoint, "join_after_ms ignored in offline replay");
                }
                (e.endpoint, e.trace)
            })
            .collect();
        replay_offline(&config, pairs, options.actuator.as_ref())?
    } else {
        run_live(scenario, config, endpoints, options.actuator, shutdown).await?
    };
    Ok(report)
}

fn load_endpoints(
    scenario: &ReplayScenario,
    base: &Path,
    reader: &TraceReader,
) -> anyhow::Result<Vec<LoadedEndpoint>> {
    scenario
        .endpoints
        .iter()
        .map(|spec| {
            let trace_path = resolve(base, &spec.trace);
            let trace = reader
                .read_file(&trace_path)
                .with_context(|| format!("Failed to load trace for endpoint {}", spec.name))?;
            info!(
                endpoint = %spec.name,
                samples = trace.len(),
                duration_s = trace.duration().as_secs_f64(),
                "loaded trace {}",
                trace_path.display()
            );
            Ok(LoadedEndpoint {
                endpoint: spec.endpoint(),
                trace,
                join_after: spec.join_after_ms.map(Duration::from_millis),
            })
        })
        .collect()
}

fn resolve(base: &Path, trace: &Path) -> PathBuf {
    if trace.is_absolute() {
        trace.to_path_buf()
    } else {
        base.join(trace)
    }
}

async fn run_live(
    scenario: &ReplayScenario,
    mut config: ReplayConfig,
    endpoints: Vec<LoadedEndpoint>,
    actuator: Arc<dyn LinkActuator>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<ReplayReport> {
    let stop_when_exhausted = config.stop_when_exhausted;
    let time_scale = config.time_scale;

    let (mut late, initial): (Vec<_>, Vec<_>) = endpoints
        .into_iter()
        .partition(|e| e.join_after.is_some_and(|d| !d.is_zero()));
    late.sort_by_key(|e| e.join_after);
    if initial.is_empty() {
        bail!("Scenario {} has no endpoint joining at start", scenario.name);
    }

    // The initial traces may run out before everyone has joined.
    let defer_exhaustion = stop_when_exhausted && !late.is_empty();
    if defer_exhaustion {
        config.stop_when_exhausted = false;
    }

    let registry = EndpointRegistry::new();
    let mut session = registry.create_session(config, actuator)?;
    for e in initial {
        session.register_endpoint(e.endpoint, e.trace)?;
    }

    // Wall-clock time; virtual time runs `time_scale` times faster.
    let started = Instant::now();
    let wall = |virtual_span: Duration| {
        wall_span(virtual_span, time_scale).and_then(|span| started.checked_add(span))
    };
    let deadline = scenario.assertions.iter().find_map(|a| match a {
        ReplayAssertion::MaxDuration { ms } => wall(Duration::from_millis(*ms)),
        _ => None,
    });

    session.start()?;
    tokio::pin!(shutdown);

    for e in late {
        let Some(at) = wall(e.join_after.unwrap_or_default()) else {
            warn!(endpoint = %e.endpoint, "join_after_ms out of range, endpoint skipped");
            continue;
        };
        tokio::select! {
            _ = sleep_until(at) => {
                let name = e.endpoint.name.clone();
                if let Err(err) = session.register_endpoint(e.endpoint, e.trace) {
                    warn!(endpoint = %name, error = %err, "late join failed");
                }
            }
            _ = sleep_until(deadline.unwrap_or(at)), if deadline.is_some_and(|d| d < at) => {
                return timed_out(&mut session, stop_when_exhausted).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(session.stop().await?);
            }
        }
    }
    if defer_exhaustion {
        session.end_when_exhausted()?;
    }

    let report = tokio::select! {
        report = session.wait(), if stop_when_exhausted => report?,
        _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
            return timed_out(&mut session, stop_when_exhausted).await;
        }
        _ = &mut shutdown => {
            info!("Shutdown requested");
            session.stop().await?
        }
    };
    Ok(report)
}

/// The `max_duration` deadline passed while the session was still running.
async fn timed_out(
    session: &mut ReplaySession,
    expected_exhaustion: bool,
) -> anyhow::Result<ReplayReport> {
    let report = session.stop().await?;
    if expected_exhaustion {
        bail!("Replay timed out after {} ms", report.duration_ms);
    }
    Ok(report)
}

pub fn check_assertions(
    assertions: &[ReplayAssertion],
    report: &ReplayReport,
) -> anyhow::Result<()> {
    for assertion in assertions {
        match assertion {
            ReplayAssertion::AppliedAtLeast { endpoint, count } => {
                let applied = report.endpoint(endpoint).map(|e| e.applied).unwrap_or(0);
                if applied < *count {
                    return Err(anyhow!(
                        "Assertion Failed: {} applied {} samples, expected at least {}",
                        endpoint,
                        applied,
                        count
                    ));
                }
            }
            ReplayAssertion::MaxFailures { count } => {
                let failed = report.total_failures();
                if failed > *count {
                    return Err(anyhow!(
                        "Assertion Failed: {} actuations failed, expected at most {}",
                        failed,
                        count
                    ));
                }
            }
            ReplayAssertion::MaxDuration { ms } => {
                if report.duration_ms > *ms {
                    return Err(anyhow!(
                        "Assertion Failed: replay took {} ms, expected at most {}",
                        report.duration_ms,
                        ms
                    ));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StopReason;
    use linkreplay_actuator::RecordingActuator;
    use std::future::pending;

    fn write_scenario(dir: &Path, body: &str) -> PathBuf {
        fs::write(
            dir.join("clientTrace.txt"),
            "0.0 2000000 0.5 10 5\n1.0 4000000 1 12 6\n2.0 6000000 2 14 7\n",
        )
        .unwrap();
        fs::write(dir.join("serverTrace.txt"), "0.0 8000000 0 5 5\n0.5 8000000 0 5 5\n").unwrap();
        let path = dir.join("replay.toml");
        fs::write(&path, body).unwrap();
        path
    }

    const SCENARIO: &str = r#"
        name = "client-server"

        [config]
        stop_when_exhausted = true

        [[endpoints]]
        name = "sta1"
        interface = "mon0"
        trace = "clientTrace.txt"

        [[endpoints]]
        name = "sta2"
        interface = "mon0"
        trace = "serverTrace.txt"
        join_after_ms = 1000

        [[assertions]]
        type = "applied_at_least"
        endpoint = "sta1"
        count = 3

        [[assertions]]
        type = "max_failures"
        count = 0
    "#;

    #[tokio::test(start_paused = true)]
    async fn live_run_registers_late_joiners_on_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(dir.path(), SCENARIO);
        let recorder = Arc::new(RecordingActuator::new());

        let report = run_scenario(&path, RunOptions::new(recorder.clone()), pending())
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::Exhausted);
        let sta2: Vec<u64> = report
            .timeline
            .iter()
            .filter(|r| r.endpoint == "sta2")
            .map(|r| r.time_ms)
            .collect();
        assert_eq!(sta2, vec![1000, 1500]);
        assert_eq!(recorder.records().len(), 5);
        assert_eq!(report.endpoint("sta1").unwrap().applied, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_replays_after_initial_traces_run_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            dir.path(),
            &SCENARIO.replace("join_after_ms = 1000", "join_after_ms = 5000"),
        );
        let recorder = Arc::new(RecordingActuator::new());

        let report = run_scenario(&path, RunOptions::new(recorder.clone()), pending())
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::Exhausted);
        let sta2: Vec<u64> = report
            .timeline
            .iter()
            .filter(|r| r.endpoint == "sta2")
            .map(|r| r.time_ms)
            .collect();
        assert_eq!(sta2, vec![5000, 5500]);
        assert_eq!(report.endpoint("sta2").unwrap().applied, 2);
        assert!(report.endpoint("sta2").unwrap().exhausted);
        assert_eq!(report.duration_ms, 5500);
        assert!(report.config.stop_when_exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn max_duration_bounds_the_wait_for_late_joiners() {
        let dir = tempfile::tempdir().unwrap();
        let body = SCENARIO.replace("join_after_ms = 1000", "join_after_ms = 60000")
            + r#"
        [[assertions]]
        type = "max_duration"
        ms = 3000
        "#;
        let path = write_scenario(dir.path(), &body);
        let recorder = Arc::new(RecordingActuator::new());

        let err = run_scenario(&path, RunOptions::new(recorder.clone()), pending())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(recorder.order().iter().all(|(name, _)| name == "sta1"));
    }

    #[tokio::test]
    async fn offline_run_checks_assertions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(dir.path(), SCENARIO);
        let recorder = Arc::new(RecordingActuator::new().fail_for("sta2"));
        let mut options = RunOptions::new(recorder);
        options.offline = true;

        let err = run_scenario(&path, options, pending()).await.unwrap_err();
        assert!(err.to_string().contains("2 actuations failed"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_a_background_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            dir.path(),
            r#"
                name = "background"

                [[endpoints]]
                name = "sta1"
                interface = "mon0"
                trace = "clientTrace.txt"
            "#,
        );
        let recorder = Arc::new(RecordingActuator::new());
        let shutdown = tokio::time::sleep(Duration::from_millis(1500));

        let report = run_scenario(&path, RunOptions::new(recorder.clone()), shutdown)
            .await
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Stopped);
        assert_eq!(report.endpoint("sta1").unwrap().applied, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cli_overrides_win_over_scenario_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(dir.path(), SCENARIO);
        let mut options = RunOptions::new(Arc::new(RecordingActuator::new()));
        options.overrides.time_scale = Some(2.0);

        let report = run_scenario(&path, options, pending()).await.unwrap();
        assert_eq!(report.config.time_scale, 2.0);
        assert!(report.config.stop_when_exhausted);
    }

    #[tokio::test]
    async fn demo_scenario_replays_offline() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/ieee80211g/replay.toml");
        let recorder = Arc::new(RecordingActuator::new());
        let mut options = RunOptions::new(recorder.clone());
        options.offline = true;

        let report = run_scenario(&path, options, pending()).await.unwrap();
        assert_eq!(report.endpoint("sta1").unwrap().applied, 9);
        assert_eq!(report.endpoint("sta2").unwrap().applied, 5);
        assert_eq!(report.duration_ms, 4000);
        // 24 Mbit/s duplex capture becomes 12 Mbit/s per direction.
        assert_eq!(recorder.records()[0].sample.bandwidth, 12.0);
    }

    #[test]
    fn missing_trace_is_reported_with_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.toml");
        fs::write(
            &path,
            r#"
                name = "broken"
                [[endpoints]]
                name = "sta9"
                interface = "mon0"
                trace = "nope.txt"
            "#,
        )
        .unwrap();
        let scenario = load_scenario(&path).unwrap();
        let err = load_endpoints(&scenario, dir.path(), &TraceReader::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("sta9"));
    }
}
