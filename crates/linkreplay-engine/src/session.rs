//! Replay sessions: the entry point that owns endpoints and drives the
//! scheduler against the wall clock.
//!
//! A session moves `Created -> Running -> Stopped`. While running, the
//! scheduler lives on its own task; the [`ReplaySession`] handle talks to it
//! over a command channel and a stop signal.

use crate::clock::VirtualClock;
use crate::error::ReplayError;
use crate::report::{Outcome, ReplayReport, ReportBuilder, StopReason};
use crate::scheduler::{Dispatch, Scheduler};
use crate::trace::{Trace, TraceReader};
use crate::worker::{Completion, Job, Worker};
use linkreplay_abstract::{ActuationError, ClockOrigin, Endpoint, LinkActuator, ReplayConfig};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Progress reported by a running session.
#[derive(Debug)]
pub enum ReplayEvent {
    Joined {
        endpoint: String,
        at: Duration,
        skipped: usize,
    },
    Applied {
        endpoint: String,
        index: usize,
        at: Duration,
    },
    Failed {
        endpoint: String,
        index: usize,
        at: Duration,
        error: ActuationError,
    },
    Exhausted {
        endpoint: String,
        at: Duration,
    },
    Left {
        endpoint: String,
        at: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Running,
    Stopped,
}

/// Tracks which endpoint names are held by live sessions.
///
/// An endpoint may belong to at most one live session created from the same
/// registry.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(
        &self,
        config: ReplayConfig,
        actuator: Arc<dyn LinkActuator>,
    ) -> Result<ReplaySession, ReplayError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(ReplaySession {
            config,
            actuator,
            registry: self.clone(),
            registered: Vec::new(),
            state: State::Created {
                pending: Vec::new(),
            },
            events_tx,
            events_rx: Some(events_rx),
        })
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    fn claim(&self, name: &str) -> Result<(), ReplayError> {
        if self.lock().insert(name.to_string()) {
            Ok(())
        } else {
            Err(ReplayError::EndpointInUse(name.to_string()))
        }
    }

    fn release(&self, name: &str) {
        self.lock().remove(name);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Command {
    Register {
        endpoint: Endpoint,
        trace: Arc<Trace>,
    },
    Unregister {
        name: String,
    },
    EndWhenExhausted,
}

enum State {
    Created {
        pending: Vec<(Endpoint, Arc<Trace>)>,
    },
    Running {
        commands: mpsc::UnboundedSender<Command>,
        stop: watch::Sender<bool>,
        task: JoinHandle<ReplayReport>,
    },
    Stopped,
}

/// Handle to one replay session.
pub struct ReplaySession {
    config: ReplayConfig,
    actuator: Arc<dyn LinkActuator>,
    registry: EndpointRegistry,
    registered: Vec<String>,
    state: State,
    events_tx: mpsc::UnboundedSender<ReplayEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ReplayEvent>>,
}

impl ReplaySession {
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.state {
            State::Created { .. } => SessionPhase::Created,
            State::Running { .. } => SessionPhase::Running,
            State::Stopped => SessionPhase::Stopped,
        }
    }

    /// Registered endpoint names in registration order.
    pub fn endpoints(&self) -> &[String] {
        &self.registered
    }

    /// The session's event stream. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ReplayEvent>> {
        self.events_rx.take()
    }

    pub fn register_endpoint(&mut self, endpoint: Endpoint, trace: Trace) -> Result<(), ReplayError> {
        if self.registered.contains(&endpoint.name) {
            return Err(ReplayError::DuplicateEndpoint(endpoint.name));
        }
        let name = endpoint.name.clone();
        let trace = Arc::new(trace);
        match &mut self.state {
            State::Stopped => return Err(ReplayError::SessionClosed),
            State::Created { pending } => {
                self.registry.claim(&name)?;
                pending.push((endpoint, trace));
            }
            State::Running { commands, .. } => {
                self.registry.claim(&name)?;
                if commands.send(Command::Register { endpoint, trace }).is_err() {
                    self.registry.release(&name);
                    return Err(ReplayError::SessionClosed);
                }
            }
        }
        debug!(endpoint = %name, "endpoint registered");
        self.registered.push(name);
        Ok(())
    }

    /// Read `path` with `reader` and register the result. A malformed trace
    /// leaves the session untouched.
    pub fn register_trace_file(
        &mut self,
        endpoint: Endpoint,
        path: impl AsRef<Path>,
        reader: &TraceReader,
    ) -> Result<(), ReplayError> {
        if matches!(self.state, State::Stopped) {
            return Err(ReplayError::SessionClosed);
        }
        let trace = reader.read_file(path)?;
        self.register_endpoint(endpoint, trace)
    }

    pub fn unregister_endpoint(&mut self, name: &str) -> Result<(), ReplayError> {
        if matches!(self.state, State::Stopped) {
            return Err(ReplayError::SessionClosed);
        }
        let pos = self
            .registered
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| ReplayError::UnknownEndpoint(name.to_string()))?;

        match &mut self.state {
            State::Stopped => return Err(ReplayError::SessionClosed),
            State::Created { pending } => pending.retain(|(e, _)| e.name != name),
            State::Running { commands, .. } => {
                let command = Command::Unregister {
                    name: name.to_string(),
                };
                if commands.send(command).is_err() {
                    return Err(ReplayError::SessionClosed);
                }
            }
        }
        self.registered.remove(pos);
        self.registry.release(name);
        Ok(())
    }

    /// Let the session end on its own once every trace is exhausted, as if
    /// it had been created with `stop_when_exhausted`.
    pub fn end_when_exhausted(&mut self) -> Result<(), ReplayError> {
        match &self.state {
            State::Stopped => return Err(ReplayError::SessionClosed),
            State::Created { .. } => {}
            State::Running { commands, .. } => {
                if commands.send(Command::EndWhenExhausted).is_err() {
                    return Err(ReplayError::SessionClosed);
                }
            }
        }
        self.config.stop_when_exhausted = true;
        Ok(())
    }

    /// Start replay. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), ReplayError> {
        let pending = match &mut self.state {
            State::Created { pending } if pending.is_empty() => {
                return Err(ReplayError::EmptySession);
            }
            State::Created { pending } => std::mem::take(pending),
            State::Running { .. } => return Err(ReplayError::AlreadyRunning),
            State::Stopped => return Err(ReplayError::SessionClosed),
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReplayError::Runtime(e.to_string()))?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        info!(
            endpoints = pending.len(),
            actuator = self.actuator.name(),
            time_scale = self.config.time_scale,
            "starting replay session"
        );
        let replay = ReplayLoop {
            config: self.config.clone(),
            actuator: Arc::clone(&self.actuator),
            scheduler: Scheduler::new(),
            clock: VirtualClock::start(self.config.time_scale),
            workers: HashMap::new(),
            report: ReportBuilder::default(),
            events: self.events_tx.clone(),
            completions_tx: Some(completions_tx),
            completions_rx,
            stop: stop_rx,
            seq: 0,
        };
        let task = runtime.spawn(replay.run(pending, commands_rx));

        self.state = State::Running {
            commands: commands_tx,
            stop: stop_tx,
            task,
        };
        Ok(())
    }

    /// Stop replay and return its report.
    ///
    /// No sample is applied once the stop has been observed; samples already
    /// applied stay applied.
    pub async fn stop(&mut self) -> Result<ReplayReport, ReplayError> {
        let report = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Created { .. } => ReportBuilder::default().finish(
                self.config.clone(),
                self.actuator.name(),
                Duration::ZERO,
                StopReason::Stopped,
            ),
            State::Running { stop, task, .. } => {
                let _ = stop.send(true);
                task.await.map_err(|e| ReplayError::Runtime(e.to_string()))?
            }
            State::Stopped => return Err(ReplayError::SessionClosed),
        };
        self.release_all();
        info!(
            duration_ms = report.duration_ms,
            applied = report.total_applied(),
            failed = report.total_failures(),
            "replay session stopped"
        );
        Ok(report)
    }

    /// Wait for replay to end on its own (see `stop_when_exhausted`).
    ///
    /// Cancel-safe: dropping the future leaves the session running.
    pub async fn wait(&mut self) -> Result<ReplayReport, ReplayError> {
        let task = match &mut self.state {
            State::Running { task, .. } => task,
            State::Created { .. } => return Err(ReplayError::NotRunning),
            State::Stopped => return Err(ReplayError::SessionClosed),
        };
        let report = task.await.map_err(|e| ReplayError::Runtime(e.to_string()));
        self.state = State::Stopped;
        self.release_all();
        report
    }

    fn release_all(&mut self) {
        for name in self.registered.drain(..) {
            self.registry.release(&name);
        }
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// The scheduler task of a running session.
struct ReplayLoop {
    config: ReplayConfig,
    actuator: Arc<dyn LinkActuator>,
    scheduler: Scheduler,
    clock: VirtualClock,
    workers: HashMap<String, Worker>,
    report: ReportBuilder,
    events: mpsc::UnboundedSender<ReplayEvent>,
    completions_tx: Option<mpsc::UnboundedSender<Completion>>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    stop: watch::Receiver<bool>,
    seq: u64,
}

impl ReplayLoop {
    async fn run(
        mut self,
        initial: Vec<(Endpoint, Arc<Trace>)>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> ReplayReport {
        for (endpoint, trace) in initial {
            self.join(endpoint, trace);
        }

        let mut accepting = true;
        let reason = loop {
            if self.dispatch_due() {
                break StopReason::Stopped;
            }
            if self.config.stop_when_exhausted && self.scheduler.is_exhausted() {
                if accepting {
                    // Refuse new commands, but anything already queued was
                    // acknowledged to the caller and still runs.
                    accepting = false;
                    commands.close();
                    while let Ok(command) = commands.try_recv() {
                        self.handle(command);
                    }
                    if !self.scheduler.is_exhausted() {
                        continue;
                    }
                }
                break StopReason::Exhausted;
            }

            let deadline = self.scheduler.next_due().map(|t| self.clock.deadline(t));
            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    break if changed.is_ok() { StopReason::Stopped } else { StopReason::Detached };
                }
                command = commands.recv(), if accepting => match command {
                    Some(command) => self.handle(command),
                    None => break StopReason::Detached,
                },
                Some(done) = self.completions_rx.recv() => self.complete(done),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }
        };

        self.shutdown(reason).await
    }

    /// Hand every sample due by now to its endpoint's worker. Returns true if
    /// a stop was observed.
    fn dispatch_due(&mut self) -> bool {
        let now = self.clock.now();
        loop {
            if *self.stop.borrow() {
                return true;
            }
            let Some(dispatch) = self.scheduler.pop_due(now) else {
                return false;
            };
            self.submit(dispatch, now);
        }
    }

    fn submit(&mut self, dispatch: Dispatch, now: Duration) {
        let seq = self.seq;
        self.seq += 1;
        let name = dispatch.endpoint.name.clone();
        debug!(
            endpoint = %dispatch.endpoint,
            index = dispatch.index,
            due_ms = dispatch.due.as_millis() as u64,
            bandwidth = dispatch.sample.bandwidth,
            loss = dispatch.sample.loss,
            delay = dispatch.sample.delay,
            latency = dispatch.sample.latency,
            "dispatch"
        );
        self.report.dispatched(&name);
        if dispatch.last {
            info!(endpoint = %name, at_ms = now.as_millis() as u64, "trace exhausted");
            self.report.exhausted(&name);
            let _ = self.events.send(ReplayEvent::Exhausted {
                endpoint: name.clone(),
                at: now,
            });
        }

        let job = Job {
            seq,
            at: now,
            dispatch,
        };
        let rejected = match self.workers.get(&name) {
            Some(worker) => worker.submit(job).err(),
            None => Some(job),
        };
        if let Some(job) = rejected {
            warn!(endpoint = %name, "no actuation worker, sample dropped");
            self.report
                .record(job.seq, &job.dispatch, job.at, Outcome::Cancelled);
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { endpoint, trace } => self.join(endpoint, trace),
            Command::EndWhenExhausted => self.config.stop_when_exhausted = true,
            Command::Unregister { name } => {
                let now = self.clock.now();
                match self.scheduler.unregister(&name) {
                    Ok(endpoint) => {
                        info!(endpoint = %endpoint, at_ms = now.as_millis() as u64, "endpoint left");
                        if let Some(worker) = self.workers.remove(&name) {
                            worker.retire();
                        }
                        let _ = self.events.send(ReplayEvent::Left {
                            endpoint: name,
                            at: now,
                        });
                    }
                    Err(e) => warn!(error = %e, "unregister ignored"),
                }
            }
        }
    }

    fn join(&mut self, endpoint: Endpoint, trace: Arc<Trace>) {
        let now = self.clock.now();
        let origin = match self.config.clock_origin {
            ClockOrigin::Endpoint => now,
            ClockOrigin::Session => Duration::ZERO,
        };
        let name = endpoint.name.clone();
        let empty = trace.is_empty();
        let registration = match self.scheduler.register(endpoint.clone(), trace, origin, now) {
            Ok(registration) => registration,
            Err(e) => {
                warn!(endpoint = %name, error = %e, "join rejected");
                return;
            }
        };
        if registration.skipped > 0 {
            warn!(
                endpoint = %name,
                skipped = registration.skipped,
                "fast-forwarded past samples of late-joining endpoint"
            );
        }

        if let Some(completions) = &self.completions_tx {
            let worker = Worker::spawn(
                Arc::clone(&self.actuator),
                self.stop.clone(),
                completions.clone(),
            );
            self.workers.insert(name.clone(), worker);
        }
        self.report.joined(&endpoint, registration.skipped);
        info!(endpoint = %endpoint, at_ms = now.as_millis() as u64, "endpoint joined");
        let _ = self.events.send(ReplayEvent::Joined {
            endpoint: name.clone(),
            at: now,
            skipped: registration.skipped,
        });
        if empty {
            info!(endpoint = %name, "empty trace, nothing to replay");
            self.report.exhausted(&name);
            let _ = self.events.send(ReplayEvent::Exhausted {
                endpoint: name,
                at: now,
            });
        }
    }

    fn complete(&mut self, done: Completion) {
        let Completion { job, result } = done;
        let name = &job.dispatch.endpoint.name;
        let outcome = match result {
            None => Outcome::Cancelled,
            Some(Ok(())) => {
                let _ = self.events.send(ReplayEvent::Applied {
                    endpoint: name.clone(),
                    index: job.dispatch.index,
                    at: job.at,
                });
                Outcome::Applied
            }
            Some(Err(error)) => {
                warn!(endpoint = %name, index = job.dispatch.index, error = %error, "actuation failed");
                let message = error.to_string();
                let _ = self.events.send(ReplayEvent::Failed {
                    endpoint: name.clone(),
                    index: job.dispatch.index,
                    at: job.at,
                    error,
                });
                Outcome::Failed { error: message }
            }
        };
        self.report.record(job.seq, &job.dispatch, job.at, outcome);
    }

    async fn shutdown(mut self, reason: StopReason) -> ReplayReport {
        let duration = self.clock.now();
        info!(?reason, duration_ms = duration.as_millis() as u64, "replay loop ending");

        for (_, worker) in self.workers.drain() {
            if reason != StopReason::Exhausted {
                worker.retire();
            }
        }
        self.completions_tx = None;
        while let Some(done) = self.completions_rx.recv().await {
            self.complete(done);
        }

        self.report.finish(
            self.config.clone(),
            self.actuator.name(),
            duration,
            reason,
        )
    }
}
