// Execution registry: identity → running execution.
//
// The only cross-execution shared state. The lock is held for map operations
// only, never across document or process I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::EngineError;

use super::execution::Execution;

#[derive(Default)]
pub struct ExecutionRegistry {
    running: Mutex<HashMap<String, Arc<Execution>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Execution>>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check-and-insert. Fails if the identity already has an execution.
    pub fn admit(&self, execution: Arc<Execution>) -> Result<(), EngineError> {
        let mut running = self.lock();
        if running.contains_key(execution.id()) {
            return Err(EngineError::AlreadyRunning { id: execution.id().to_string() });
        }
        running.insert(execution.id().to_string(), execution);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Execution>> {
        self.lock().get(id).cloned()
    }

    /// Remove `execution` if it is still the registered entry for its identity.
    ///
    /// Returns false when another execution holds the identity (or none does).
    pub fn release(&self, execution: &Arc<Execution>) -> bool {
        let mut running = self.lock();
        match running.get(execution.id()) {
            Some(current) if Arc::ptr_eq(current, execution) => {
                running.remove(execution.id());
                true
            }
            _ => false,
        }
    }

    /// Identities currently running, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use fencerun_common::types::DocumentHandle;
    use nix::sys::signal::Signal;

    use super::*;

    fn execution(id: &str) -> Arc<Execution> {
        Arc::new(Execution::new(id, DocumentHandle(1), Signal::SIGINT))
    }

    #[test]
    fn second_admit_of_same_identity_is_rejected() {
        let registry = ExecutionRegistry::new();
        registry.admit(execution("7")).expect("first admit");

        let error = registry.admit(execution("7")).unwrap_err();
        assert!(matches!(error, EngineError::AlreadyRunning { ref id } if id == "7"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_admits_let_exactly_one_through() {
        let registry = Arc::new(ExecutionRegistry::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.admit(execution("42")).is_ok()
                })
            })
            .collect();

        let admitted = handles.into_iter().map(|h| h.join().expect("thread")).filter(|ok| *ok).count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.ids(), vec!["42".to_string()]);
    }

    #[test]
    fn release_only_removes_the_owning_execution() {
        let registry = ExecutionRegistry::new();
        let owner = execution("1");
        let stranger = execution("1");
        registry.admit(owner.clone()).expect("admit");

        assert!(!registry.release(&stranger));
        assert!(registry.lookup("1").is_some());

        assert!(registry.release(&owner));
        assert!(registry.lookup("1").is_none());
        assert!(!registry.release(&owner));
        assert!(registry.is_empty());
    }
}
