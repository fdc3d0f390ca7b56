use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{EngineError, Result};

/// In-process registry of subjects currently being reconciled or promoted.
/// Cross-process exclusion comes from `BEGIN IMMEDIATE` in the store.
#[derive(Debug, Default)]
pub struct SubjectLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

#[derive(Debug)]
pub struct SubjectGuard<'a> {
    locks: &'a SubjectLocks,
    subject_key: String,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for `subject_key` to be released.
    pub fn acquire(&self, subject_key: &str, timeout: Duration) -> Result<SubjectGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(subject_key) {
            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::SubjectLocked(subject_key.to_string()));
            }
            let (next, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = next;
        }

        held.insert(subject_key.to_string());
        debug!(subject_key = %subject_key, "acquired subject lock");
        Ok(SubjectGuard {
            locks: self,
            subject_key: subject_key.to_string(),
        })
    }
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.subject_key);
        self.locks.released.notify_all();
        debug!(subject_key = %self.subject_key, "released subject lock");
    }
}
