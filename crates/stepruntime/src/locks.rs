use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use stepcore::events::ExecutionId;
use stepcore::{EngineError, Result};

/// Registry of scoped locks on concurrent-root executions.
///
/// A gateway synchronization decision holds the lock on its concurrent
/// root for the duration of the decision; the guard releases it on every
/// exit path. Mutual exclusion across operation chains is provided by the
/// surrounding command collaborator — this lock makes the critical section
/// explicit and turns an overlapping decision into a detectable fault.
pub struct RootLocks {
    held: Mutex<HashSet<ExecutionId>>,
}

impl RootLocks {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
        }
    }

    pub fn acquire(self: &Arc<Self>, root: ExecutionId) -> Result<RootLockGuard> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| EngineError::Invariant("lock registry poisoned".into()))?;
        if !held.insert(root) {
            return Err(EngineError::Invariant(format!(
                "concurrent root '{}' is already locked",
                root
            )));
        }
        Ok(RootLockGuard {
            locks: Arc::clone(self),
            root,
        })
    }
}

impl Default for RootLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard for a held concurrent-root lock; dropping it releases the lock.
pub struct RootLockGuard {
    locks: Arc<RootLocks>,
    root: ExecutionId,
}

impl Drop for RootLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            held.remove(&self.root);
        }
    }
}
