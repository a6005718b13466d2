use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use serde::{Deserialize, Serialize};
use log::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
    Publishing,
    Stopping,
}

#[derive(Debug, Default)]
struct RelayCounters {
    ticks: AtomicU64,
    selections: AtomicU64,
    ignored: AtomicU64,
}

// Lifecycle state and counters shared between the relay tasks and the status API
#[derive(Debug, Clone)]
pub struct RelayStatus {
    state: Arc<Mutex<RelayState>>,
    counters: Arc<RelayCounters>,
}

impl RelayStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState::Disconnected)),
            counters: Arc::new(RelayCounters::default()),
        }
    }

    pub fn get_state(&self) -> RelayState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, next: RelayState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            debug!("Relay state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Moves to `next` only when the current state is `expected`.
    pub fn transition(&self, expected: RelayState, next: RelayState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == expected {
            debug!("Relay state {:?} -> {:?}", *state, next);
            *state = next;
            true
        } else {
            false
        }
    }

    pub fn record_tick(&self) {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_selection(&self) {
        self.counters.selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.counters.ignored.fetch_add(1, Ordering::Relaxed);
    }

    // (ticks, selections, ignored)
    pub fn get_stats(&self) -> (u64, u64, u64) {
        (
            self.counters.ticks.load(Ordering::Relaxed),
            self.counters.selections.load(Ordering::Relaxed),
            self.counters.ignored.load(Ordering::Relaxed),
        )
    }
}

impl Default for RelayStatus {
    fn default() -> Self {
        Self::new()
    }
}
