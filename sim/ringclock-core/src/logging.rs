//! Logging holds wrapper functions for the structured events a machine emits.
//! Each function corresponds to a type of event (machine creation, recorded
//! events, link changes). Subscribers are installed by the binary.

use crate::{link::Role, recorder::Event};
use std::net::SocketAddr;
use tracing::{event, Level};

/// Logged once per machine, with the event rate it was assigned.
pub(crate) fn machine_creation_event(id: usize, rate: u32, listen: SocketAddr, peer: SocketAddr) {
    event!(
        Level::INFO,
        machine = id,
        rate,
        listen = %listen,
        peer = %peer,
        "Clock Speed: {}",
        rate
    );
}

/// Logged for every event handed to the recorder.
pub(crate) fn recorded_event(id: usize, record: &Event) {
    event!(
        Level::INFO,
        machine = id,
        kind = record.kind.as_str(),
        system_time = record.system_time,
        clock = record.clock,
        queue_len = record.queue_len,
        message = record.message.as_deref(),
        "{} event",
        record.kind
    );
}

/// Logged when a link of a machine gets its connection.
pub(crate) fn link_connected_event(id: usize, role: Role, peer: SocketAddr) {
    event!(Level::INFO, machine = id, role = %role, peer = %peer, "Connected");
}

/// Logged when a read loop gives up on its connection for good.
pub(crate) fn link_terminated_event(id: usize, role: Role, reason: &dyn std::fmt::Display) {
    event!(
        Level::WARN,
        machine = id,
        role = %role,
        reason = %reason,
        "Connection aborted"
    );
}
