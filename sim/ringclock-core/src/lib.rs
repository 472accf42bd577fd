//! Ringclock, a library for watching Lamport clocks drift, jump and converge
//! across a ring of machines that run at different speeds.
//!
//! # Uses
//!
//! - Educators can use Ringclock to show how logical time is derived from
//!   message exchange alone: every machine keeps its own clock, ticks it on
//!   local events and merges the timestamps it receives.
//! - Operators can vary the relative event rates of the machines and watch
//!   inbound queues build up on the slower ones.
//!
//! # Organization
//! - [`LogicalClock`] implements the Lamport update rule
//! - [`InboundQueue`] buffers payloads between the network and the event loop
//! - [`PeerLink`](link::PeerLink) carries one connection of a machine and
//!   runs its read loop
//! - [`Machine`] owns all of the above and drives the event loop
//! - [`EventRecorder`] is the sink every state-affecting iteration reports to
//!
//! # Topology
//!
//! Machine `i` of `n` listens on `base_port + i` and connects to
//! `base_port + (i + 1) % n`, so each machine has exactly one outbound
//! connection to its successor and one inbound connection from its
//! predecessor. Messages can travel both ways over either connection.

mod logging;

pub mod clock;
pub use clock::{ClockError, LogicalClock};

pub mod queue;
pub use queue::InboundQueue;

pub mod message;

pub mod task;
pub use task::{TaskKind, TaskSource};

pub mod shutdown;
pub use shutdown::{ExitStatus, Shutdown};

pub mod config;
pub use config::{MachineConfig, RingConfig};

pub mod recorder;
pub use recorder::{Event, EventKind, EventRecorder};

pub mod link;

pub mod machine;
pub use machine::{Machine, MachineError, MachineState};
