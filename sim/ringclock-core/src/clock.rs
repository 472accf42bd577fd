use std::sync::{Mutex, PoisonError};
use thiserror::Error as ThisError;

/// A Lamport logical clock.
///
/// Local events [`tick`](LogicalClock::tick) the clock, and timestamps
/// received from other machines are merged with
/// [`update`](LogicalClock::update). All operations share one lock, so the
/// value observed through [`get`](LogicalClock::get) never decreases. An
/// operation that would advance past `u64::MAX` fails and leaves the clock
/// where it was.
#[derive(Debug, Default)]
pub struct LogicalClock {
    time: Mutex<u64>,
}

impl LogicalClock {
    /// Creates a clock starting at zero.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a clock starting at `initial_time`.
    pub fn starting_at(initial_time: u64) -> Self {
        Self {
            time: Mutex::new(initial_time),
        }
    }

    /// Advances the clock by one and returns the new value.
    pub fn tick(&self) -> Result<u64, ClockError> {
        let mut time = self.lock();
        *time = time.checked_add(1).ok_or(ClockError::Exhausted)?;
        Ok(*time)
    }

    /// Merges a timestamp received from another machine, setting the clock
    /// to `max(local, remote) + 1`. Returns the new value.
    pub fn update(&self, remote: u64) -> Result<u64, ClockError> {
        let mut time = self.lock();
        *time = (*time)
            .max(remote)
            .checked_add(1)
            .ok_or(ClockError::Exhausted)?;
        Ok(*time)
    }

    /// The current value of the clock.
    pub fn get(&self) -> u64 {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u64> {
        // A u64 cannot be left half-written, so a poisoned lock is still usable
        self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("The clock cannot advance past {}", u64::MAX)]
    Exhausted,
}
