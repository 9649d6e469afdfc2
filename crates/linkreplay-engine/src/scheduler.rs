use crate::error::ReplayError;
use crate::store::TraceStore;
use crate::trace::Trace;
use linkreplay_abstract::{Endpoint, Sample};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A sample that has come due for one endpoint.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub endpoint: Endpoint,
    pub sample: Sample,
    /// Position of `sample` in the endpoint's trace.
    pub index: usize,
    /// Virtual time at which the sample is due.
    pub due: Duration,
    /// True when this was the endpoint's final sample.
    pub last: bool,
}

/// Result of registering an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Where trace time 0 sits on the session clock.
    pub origin: Duration,
    /// Past samples dropped by fast-forwarding.
    pub skipped: usize,
}

#[derive(Debug)]
struct Due {
    time: Duration,
    order: u64,
    index: usize,
}

// Min-heap on (time, registration order)
impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.order == other.order
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

#[derive(Debug)]
struct Cursor {
    endpoint: Endpoint,
    next: usize,
    origin: Duration,
}

impl Cursor {
    fn due_at(&self, trace: &Trace, index: usize) -> Option<Duration> {
        trace.get(index).map(|s| self.due_of(s))
    }

    fn due_of(&self, sample: &Sample) -> Duration {
        self.origin
            .saturating_add(Duration::from_secs_f64(sample.timestamp))
    }
}

/// Merges every registered endpoint's trace into one timeline.
///
/// Traces live in the scheduler's [`TraceStore`]; each endpoint keeps a cursor
/// to its next unapplied sample and has at most one entry in the queue. Samples come out in virtual-time order; endpoints
/// due at the same instant come out in registration order.
#[derive(Debug, Default)]
pub struct Scheduler {
    time: Duration,
    queue: BinaryHeap<Due>,
    cursors: HashMap<u64, Cursor>,
    by_name: HashMap<String, u64>,
    next_order: u64,
    store: TraceStore,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `endpoint`, mapping its trace time 0 onto virtual time `origin`.
    ///
    /// Samples strictly earlier than `now` are fast-forwarded: only the latest
    /// of them stays pending, so link state catches up in one step.
    pub fn register(
        &mut self,
        endpoint: Endpoint,
        trace: impl Into<Arc<Trace>>,
        origin: Duration,
        now: Duration,
    ) -> Result<Registration, ReplayError> {
        if self.by_name.contains_key(&endpoint.name) {
            return Err(ReplayError::DuplicateEndpoint(endpoint.name));
        }
        let trace = trace.into();
        let order = self.next_order;
        self.next_order += 1;

        let mut cursor = Cursor {
            endpoint,
            next: 0,
            origin,
        };
        let past = trace
            .samples()
            .partition_point(|s| cursor.due_of(s) < now);
        let skipped = past.saturating_sub(1);
        cursor.next = skipped;

        if let Some(time) = cursor.due_at(&trace, cursor.next) {
            self.queue.push(Due {
                time,
                order,
                index: cursor.next,
            });
        }

        debug!(
            endpoint = %cursor.endpoint,
            samples = trace.len(),
            origin_ms = origin.as_millis() as u64,
            skipped,
            "registered endpoint"
        );
        self.store.put(cursor.endpoint.name.clone(), trace);
        self.by_name.insert(cursor.endpoint.name.clone(), order);
        self.cursors.insert(order, cursor);

        Ok(Registration { origin, skipped })
    }

    /// Stop scheduling `name`. Its pending queue entry is discarded lazily.
    pub fn unregister(&mut self, name: &str) -> Result<Endpoint, ReplayError> {
        let order = *self
            .by_name
            .get(name)
            .ok_or_else(|| ReplayError::UnknownEndpoint(name.to_string()))?;
        self.store.remove(name)?;
        self.by_name.remove(name);
        let cursor = self
            .cursors
            .remove(&order)
            .ok_or_else(|| ReplayError::UnknownEndpoint(name.to_string()))?;
        Ok(cursor.endpoint)
    }

    /// Earliest virtual time at which any endpoint has a sample due.
    pub fn next_due(&mut self) -> Option<Duration> {
        self.discard_stale();
        self.queue.peek().map(|d| d.time)
    }

    /// Pop the next sample if it is due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<Dispatch> {
        match self.next_due() {
            Some(t) if t <= now => self.pop_next(),
            _ => None,
        }
    }

    /// Pop the next sample regardless of wall time, advancing the virtual clock to it.
    pub fn step(&mut self) -> Option<Dispatch> {
        let dispatch = self.pop_next()?;
        self.time = self.time.max(dispatch.due);
        Some(dispatch)
    }

    /// Virtual time reached by [`Scheduler::step`].
    pub fn current_time(&self) -> Duration {
        self.time
    }

    pub fn is_exhausted(&mut self) -> bool {
        self.next_due().is_none()
    }

    /// Samples not yet dispatched for `name`.
    pub fn remaining(&self, name: &str) -> Option<usize> {
        let cursor = self.cursors.get(self.by_name.get(name)?)?;
        let trace = self.store.trace(name)?;
        Some(trace.len().saturating_sub(cursor.next))
    }

    /// Registered endpoints in registration order.
    pub fn endpoints(&self) -> Vec<&Endpoint> {
        let mut ordered: Vec<_> = self.cursors.iter().collect();
        ordered.sort_by_key(|(order, _)| **order);
        ordered.into_iter().map(|(_, c)| &c.endpoint).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    fn pop_next(&mut self) -> Option<Dispatch> {
        self.discard_stale();
        let due = self.queue.pop()?;
        let cursor = self.cursors.get_mut(&due.order)?;
        let trace = self.store.trace(&cursor.endpoint.name)?;

        let sample = *trace.get(due.index)?;
        cursor.next = due.index + 1;
        let next_time = cursor.due_at(trace, cursor.next);
        if let Some(time) = next_time {
            self.queue.push(Due {
                time,
                order: due.order,
                index: cursor.next,
            });
        }

        Some(Dispatch {
            endpoint: cursor.endpoint.clone(),
            sample,
            index: due.index,
            due: due.time,
            last: next_time.is_none(),
        })
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.queue.peek() {
            let live = self
                .cursors
                .get(&top.order)
                .is_some_and(|c| c.next == top.index);
            if live {
                break;
            }
            debug!(index = top.index, "discarding entry of unregistered endpoint");
            self.queue.pop();
        }
    }
}
