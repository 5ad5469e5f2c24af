//! Process-wide machine control state
//!
//! One emergency-stop flag and one telemetry interval, read by the polling
//! loop once per device visit and written by command handlers. Both fields
//! live behind a single lock so readers always see a consistent pair.

use crate::error::{BridgeError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 2000;

/// Polling mode derived from the stop flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Running,
    Paused,
}

/// Consistent copy of the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub stopped: bool,
    pub interval_ms: u64,
}

impl StateSnapshot {
    pub fn mode(&self) -> RunMode {
        if self.stopped {
            RunMode::Paused
        } else {
            RunMode::Running
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Cloneable handle to the shared state
#[derive(Debug, Clone)]
pub struct DeviceState {
    inner: Shared<StateSnapshot>,
}

impl DeviceState {
    pub fn new(interval_ms: u64) -> Result<Self> {
        if interval_ms == 0 {
            return Err(BridgeError::Command("telemetry interval must be positive".into()));
        }
        Ok(Self {
            inner: new_state(StateSnapshot {
                stopped: false,
                interval_ms,
            }),
        })
    }

    pub fn get(&self) -> StateSnapshot {
        *self.inner.lock()
    }

    /// Apply several changes under one lock acquisition
    pub fn update(&self, change: impl FnOnce(&mut StateSnapshot)) {
        change(&mut self.inner.lock());
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.update(|snapshot| snapshot.stopped = stopped);
    }

    /// Rejects zero, leaving the current interval in place
    pub fn set_interval(&self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(BridgeError::Command("telemetry interval must be positive".into()));
        }
        self.update(|snapshot| snapshot.interval_ms = interval_ms);
        Ok(())
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            inner: new_state(StateSnapshot {
                stopped: false,
                interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = DeviceState::default();
        assert_eq!(
            state.get(),
            StateSnapshot {
                stopped: false,
                interval_ms: 2000
            }
        );
        assert_eq!(state.get().mode(), RunMode::Running);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(DeviceState::new(0).is_err());

        let state = DeviceState::new(750).unwrap();
        assert!(state.set_interval(0).is_err());
        assert_eq!(state.get().interval_ms, 750);
    }

    #[test]
    fn test_stop_and_reset() {
        let state = DeviceState::default();
        state.set_stopped(true);
        assert_eq!(state.get().mode(), RunMode::Paused);
        state.set_stopped(false);
        assert_eq!(state.get().mode(), RunMode::Running);
    }

    #[test]
    fn test_clones_share_state() {
        let state = DeviceState::default();
        let handle = state.clone();
        handle.set_interval(500).unwrap();
        assert_eq!(state.get().interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        let state = DeviceState::new(1000).unwrap();
        state.set_stopped(true);
        // every write keeps `stopped` equal to the interval's parity
        let writers: Vec<_> = (0..4u64)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for n in 1..=500u64 {
                        let interval_ms = 1000 + n * 4 + i;
                        state.update(|snapshot| {
                            snapshot.interval_ms = interval_ms;
                            snapshot.stopped = interval_ms % 2 == 0;
                        });
                    }
                })
            })
            .collect();

        for _ in 0..5000 {
            let snapshot = state.get();
            assert!(snapshot.interval_ms >= 1000);
            assert_eq!(snapshot.stopped, snapshot.interval_ms % 2 == 0, "{:?}", snapshot);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert!(state.get().interval_ms > 1000 + 499 * 4);
    }
}
