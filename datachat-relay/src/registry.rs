//! Session registry: participant name → current endpoint.
//!
//! The registry is the only mutable state shared between relay workers.
//! Every operation takes the same [`parking_lot::Mutex`] for the duration
//! of a map operation and never across an `.await`, so sends always work
//! from a [`snapshot`](SessionRegistry::snapshot) rather than the live map.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::transport::Endpoint;

/// Concurrent map of registered sessions.
///
/// All operations are total: removing an unknown name or looking one up is
/// not an error.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Endpoint>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` at `endpoint`, returning the endpoint it replaced.
    ///
    /// A repeat registration overwrites the endpoint in place.
    pub fn upsert(&self, name: &str, endpoint: Endpoint) -> Option<Endpoint> {
        self.sessions.lock().insert(name.to_string(), endpoint)
    }

    /// Removes `name`. Returns `true` if a session existed.
    pub fn remove(&self, name: &str) -> bool {
        self.sessions.lock().remove(name).is_some()
    }

    /// Current endpoint of `name`, if registered.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Endpoint> {
        self.sessions.lock().get(name).copied()
    }

    /// Point-in-time copy of every session.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Endpoint)> {
        self.sessions
            .lock()
            .iter()
            .map(|(name, endpoint)| (name.clone(), *endpoint))
            .collect()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.sessions.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Evicts sessions whose sends failed, in one lock acquisition.
    ///
    /// A session is only removed if it is still registered at the endpoint
    /// that failed; one that re-registered from a new address in the
    /// meantime is kept. Returns the names that were removed.
    pub fn evict(&self, failed: &[(String, Endpoint)]) -> Vec<String> {
        let mut sessions = self.sessions.lock();
        let mut evicted = Vec::with_capacity(failed.len());
        for (name, endpoint) in failed {
            if sessions.get(name) == Some(endpoint) {
                sessions.remove(name);
                evicted.push(name.clone());
            }
        }
        evicted
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
