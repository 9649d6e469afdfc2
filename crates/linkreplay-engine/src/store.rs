use crate::error::ReplayError;
use crate::trace::Trace;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Keyed store of one trace per endpoint name. Holds no temporal state.
#[derive(Debug, Default, Clone)]
pub struct TraceStore {
    traces: HashMap<String, Arc<Trace>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `trace` for `endpoint`, replacing any previous one.
    pub fn put(&mut self, endpoint: impl Into<String>, trace: impl Into<Arc<Trace>>) {
        self.traces.insert(endpoint.into(), trace.into());
    }

    pub fn get(&self, endpoint: &str) -> Result<Arc<Trace>, ReplayError> {
        self.traces
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ReplayError::UnknownEndpoint(endpoint.to_string()))
    }

    /// Borrowing lookup for hot paths.
    pub fn trace(&self, endpoint: &str) -> Option<&Trace> {
        self.traces.get(endpoint).map(Arc::as_ref)
    }

    pub fn remove(&mut self, endpoint: &str) -> Result<Arc<Trace>, ReplayError> {
        self.traces
            .remove(endpoint)
            .ok_or_else(|| ReplayError::UnknownEndpoint(endpoint.to_string()))
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.traces.contains_key(endpoint)
    }

    pub fn endpoints(&self) -> BTreeSet<&str> {
        self.traces.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceReader;

    #[test]
    fn last_put_wins() {
        let reader = TraceReader::new();
        let mut store = TraceStore::new();
        store.put("sta1", reader.read_str("0 2000000 0 0 0").unwrap());
        store.put("sta1", reader.read_str("0 4000000 0 0 0\n1 4000000 0 0 0").unwrap());

        let trace = store.get("sta1").unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.samples()[0].bandwidth, 2.0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_endpoint_is_an_error() {
        let store = TraceStore::new();
        assert!(matches!(
            store.get("ap3"),
            Err(ReplayError::UnknownEndpoint(name)) if name == "ap3"
        ));
    }

    #[test]
    fn lists_endpoint_names() {
        let mut store = TraceStore::new();
        store.put("sta2", Trace::default());
        store.put("sta1", Trace::default());
        let names: Vec<_> = store.endpoints().into_iter().collect();
        assert_eq!(names, vec!["sta1", "sta2"]);

        store.remove("sta1").unwrap();
        assert!(!store.contains("sta1"));
        assert!(store.remove("sta1").is_err());
    }
}
