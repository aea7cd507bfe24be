//! In-process server state.
//!
//! Admission scalars are atomics: handlers read them without locking and a
//! single control path mutates them. The stop-flag registry tracks in-flight
//! executions so a stop request can suppress further status emissions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::LimitsConfig;

/// Mutable server-wide state shared by every connection.
#[derive(Debug)]
pub struct ServerState {
    max_concurrent_executions: AtomicUsize,
    executions_halted: AtomicBool,
    maintenance_mode: AtomicBool,
    stop_flags: DashMap<String, Arc<AtomicBool>>,
}

impl ServerState {
    /// Initialise from the configured limits.
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            max_concurrent_executions: AtomicUsize::new(limits.max_concurrent_executions),
            executions_halted: AtomicBool::new(limits.executions_halted),
            maintenance_mode: AtomicBool::new(limits.maintenance_mode),
            stop_flags: DashMap::new(),
        }
    }

    pub fn max_concurrent_executions(&self) -> usize {
        self.max_concurrent_executions.load(Ordering::Relaxed)
    }

    pub fn set_max_concurrent_executions(&self, cap: usize) {
        self.max_concurrent_executions.store(cap, Ordering::Relaxed);
    }

    pub fn executions_halted(&self) -> bool {
        self.executions_halted.load(Ordering::Relaxed)
    }

    pub fn set_executions_halted(&self, halted: bool) {
        self.executions_halted.store(halted, Ordering::Relaxed);
    }

    pub fn maintenance_mode(&self) -> bool {
        self.maintenance_mode.load(Ordering::Relaxed)
    }

    pub fn set_maintenance_mode(&self, maintenance: bool) {
        self.maintenance_mode.store(maintenance, Ordering::Relaxed);
    }

    /// Register an in-flight execution and return its stop flag.
    pub fn register_execution(&self, execution_id: &str) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.stop_flags.insert(execution_id.to_string(), flag.clone());
        flag
    }

    /// Raise the stop flag for an execution, if it is still in flight.
    pub fn request_stop(&self, execution_id: &str) -> bool {
        match self.stop_flags.get(execution_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drop the stop flag once the execution task has finished.
    pub fn release_execution(&self, execution_id: &str) {
        self.stop_flags.remove(execution_id);
    }
}
