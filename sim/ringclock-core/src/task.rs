//! What a machine does on an iteration where its queue is empty.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{collections::VecDeque, fmt::Display};

/// The action taken on an idle iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Send over the connection this machine opened to its successor.
    SendViaOutbound,
    /// Send over the connection this machine accepted from its predecessor.
    SendViaInbound,
    /// Send over both connections, one after the other.
    SendViaBoth,
    /// Tick the clock without touching the network. Carries the code it was
    /// drawn as, between 4 and 10.
    Internal(u8),
}

impl TaskKind {
    /// The lowest code a task can be drawn as.
    pub const MIN_CODE: u8 = 1;
    /// The highest code a task can be drawn as.
    pub const MAX_CODE: u8 = 10;

    /// Maps a drawn code onto a task. Codes 1 to 3 send, everything else is
    /// an internal event.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::SendViaOutbound,
            2 => Self::SendViaInbound,
            3 => Self::SendViaBoth,
            code => Self::Internal(code),
        }
    }

    /// The code embedded in outgoing messages.
    pub fn code(self) -> u8 {
        match self {
            Self::SendViaOutbound => 1,
            Self::SendViaInbound => 2,
            Self::SendViaBoth => 3,
            Self::Internal(code) => code,
        }
    }

    pub fn sends_outbound(self) -> bool {
        matches!(self, Self::SendViaOutbound | Self::SendViaBoth)
    }

    pub fn sends_inbound(self) -> bool {
        matches!(self, Self::SendViaInbound | Self::SendViaBoth)
    }

    pub fn is_send(self) -> bool {
        self.sends_outbound() || self.sends_inbound()
    }
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendViaOutbound => write!(f, "send via outbound"),
            Self::SendViaInbound => write!(f, "send via inbound"),
            Self::SendViaBoth => write!(f, "send via both"),
            Self::Internal(code) => write!(f, "internal ({code})"),
        }
    }
}

/// Decides which task a machine performs next.
pub trait TaskSource: Send {
    fn draw(&mut self) -> TaskKind;
}

/// Draws task codes uniformly from 1 to 10.
pub struct UniformTasks {
    rng: SmallRng,
}

impl UniformTasks {
    pub fn new(rng: SmallRng) -> Self {
        Self { rng }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl TaskSource for UniformTasks {
    fn draw(&mut self) -> TaskKind {
        TaskKind::from_code(self.rng.gen_range(TaskKind::MIN_CODE..=TaskKind::MAX_CODE))
    }
}

/// Replays a fixed list of tasks, then falls back to internal events.
#[derive(Debug, Default, Clone)]
pub struct ScriptedTasks {
    tasks: VecDeque<TaskKind>,
}

impl ScriptedTasks {
    pub fn new(tasks: impl IntoIterator<Item = TaskKind>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    pub fn from_codes(codes: impl IntoIterator<Item = u8>) -> Self {
        Self::new(codes.into_iter().map(TaskKind::from_code))
    }

    pub fn remaining(&self) -> usize {
        self.tasks.len()
    }
}

impl TaskSource for ScriptedTasks {
    fn draw(&mut self) -> TaskKind {
        self.tasks
            .pop_front()
            .unwrap_or(TaskKind::Internal(TaskKind::MAX_CODE))
    }
}
