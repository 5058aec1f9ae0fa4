//! Time-stamped FIFO that enforces a minimum hold from arrival to pop.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::delay_setting::DelaySetting;
use crate::error::GuardTimeout;

const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(250);

struct Entry {
    arrival: Instant,
    payload: Bytes,
}

/// A FIFO of arrival-stamped byte payloads, gated by a shared
/// [`DelaySetting`]. `pop` only releases the head entry once it has aged
/// past the current hold time; later entries never skip ahead of it, so a
/// long hold on the head entry holds up everything behind it (intentional:
/// it preserves delivery order even across a runtime hold-time change).
pub struct DelayQueue {
    entries: Mutex<VecDeque<Entry>>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends `payload` with an arrival timestamp of now. Returns the new
    /// queue length.
    pub fn push(&self, payload: Bytes) -> Result<usize, GuardTimeout> {
        let mut guard = self.entries.try_lock_for(ACQUIRE_TIMEOUT).ok_or(GuardTimeout)?;
        guard.push_back(Entry {
            arrival: Instant::now(),
            payload,
        });
        Ok(guard.len())
    }

    /// Returns the head payload if it has aged at least `setting.current()`
    /// seconds, else `None` without disturbing the queue.
    pub fn pop(&self, setting: &DelaySetting) -> Result<Option<Bytes>, GuardTimeout> {
        let mut guard = self.entries.try_lock_for(ACQUIRE_TIMEOUT).ok_or(GuardTimeout)?;
        let Some(front) = guard.front() else {
            return Ok(None);
        };
        let hold = Duration::from_secs_f64(setting.current().max(0.0));
        if front.arrival.elapsed() >= hold {
            let entry = guard.pop_front().expect("front() just confirmed an entry exists");
            Ok(Some(entry.payload))
        } else {
            Ok(None)
        }
    }

    /// Removes every entry, returning the prior length.
    pub fn clear(&self) -> Result<usize, GuardTimeout> {
        let mut guard = self.entries.try_lock_for(ACQUIRE_TIMEOUT).ok_or(GuardTimeout)?;
        let len = guard.len();
        guard.clear();
        Ok(len)
    }

    pub fn length(&self) -> Result<usize, GuardTimeout> {
        let guard = self.entries.try_lock_for(ACQUIRE_TIMEOUT).ok_or(GuardTimeout)?;
        Ok(guard.len())
    }

    /// Debug string listing the byte length of each queued entry, e.g.
    /// `[3, 5, 1022]`.
    pub fn describe(&self) -> Result<String, GuardTimeout> {
        let guard = self.entries.try_lock_for(ACQUIRE_TIMEOUT).ok_or(GuardTimeout)?;
        let mut out = String::from("[");
        for (i, entry) in guard.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "{}", entry.payload.len()).expect("String writes never fail");
        }
        out.push(']');
        Ok(out)
    }
}

impl Default for DelayQueue {
    fn default() -> Self {
        Self::new()
    }
}
