//! The `ringclock` binary: a command line around [`ringclock_core`] that runs
//! one machine per process and records its events to CSV.

pub mod cli;
pub mod launcher;
pub mod recorder;
