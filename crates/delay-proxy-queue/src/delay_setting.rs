//! Process-wide, concurrently mutable hold-time setting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(500);

/// The current hold time, in seconds. Reads and writes go through a
/// bounded-wait guard; a writer that never shows up cannot hang a reader
/// forever, since [`DelaySetting::current`] falls back to the last known
/// good value rather than blocking indefinitely.
pub struct DelaySetting {
    guarded: Mutex<Option<f64>>,
    cached: AtomicU64,
}

impl DelaySetting {
    pub fn new() -> Self {
        Self::with_override(None)
    }

    pub fn with_override(initial: Option<f64>) -> Self {
        let cached = initial.unwrap_or(0.0);
        Self {
            guarded: Mutex::new(initial),
            cached: AtomicU64::new(cached.to_bits()),
        }
    }

    /// Sets (or clears, with `None`) the override. Returns whether the
    /// guard was acquired in time; on failure the prior override is left
    /// untouched and a WARN is logged.
    pub fn set_override(&self, value: Option<f64>) -> bool {
        match self.guarded.try_lock_for(ACQUIRE_TIMEOUT) {
            Some(mut guard) => {
                *guard = value;
                tracing::info!(?value, "delay override changed");
                true
            }
            None => {
                tracing::warn!("failed to override: could not acquire delay setting guard");
                false
            }
        }
    }

    pub fn clear_override(&self) -> bool {
        self.set_override(None)
    }

    /// Returns the current hold time in seconds: the override if one is
    /// set, otherwise the policy default of `0`. Falls back to the cached
    /// value (logging a WARN) if the guard cannot be acquired within the
    /// bound.
    pub fn current(&self) -> f64 {
        match self.guarded.try_lock_for(ACQUIRE_TIMEOUT) {
            Some(guard) => {
                let value = guard.unwrap_or(0.0);
                self.cached.store(value.to_bits(), Ordering::Relaxed);
                value
            }
            None => {
                let cached = f64::from_bits(self.cached.load(Ordering::Relaxed));
                tracing::warn!(cached, "using cached delay: guard timed out");
                cached
            }
        }
    }
}

impl Default for DelaySetting {
    fn default() -> Self {
        Self::new()
    }
}
