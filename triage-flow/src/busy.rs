//! In-flight markers that stand in for a disabled submit control.
//!
//! They do not serialize anything: the backend is the authority. They only stop
//! the client from issuing a second conflicting request while the first is
//! outstanding. Release happens when the guard is dropped.

use dashmap::DashSet;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::{Result, TriageError};

/// Busy marker for a single operation (e.g. "submit assessment").
#[derive(Debug, Clone)]
pub struct BusyFlag {
    name: &'static str,
    busy: Arc<AtomicBool>,
}

impl BusyFlag {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the operation as in flight, or fails with `Busy` if it already is.
    pub fn try_begin(&self) -> Result<BusyGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TriageError::Busy(self.name.to_string()));
        }
        Ok(BusyGuard {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[must_use = "the operation is released as soon as the guard is dropped"]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Busy markers keyed by entity id (e.g. one per chat message being edited).
#[derive(Debug, Clone)]
pub struct BusySet {
    name: &'static str,
    keys: Arc<DashSet<String>>,
}

impl BusySet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            keys: Arc::new(DashSet::new()),
        }
    }

    pub fn try_begin(&self, key: &str) -> Result<KeyGuard> {
        if !self.keys.insert(key.to_string()) {
            return Err(TriageError::Busy(format!("{} {}", self.name, key)));
        }
        Ok(KeyGuard {
            key: key.to_string(),
            keys: self.keys.clone(),
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

#[must_use = "the entity is released as soon as the guard is dropped"]
pub struct KeyGuard {
    key: String,
    keys: Arc<DashSet<String>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}
