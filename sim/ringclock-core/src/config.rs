//! Settings for a machine and the ring it belongs to.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    ops::RangeInclusive,
    time::Duration,
};
use thiserror::Error as ThisError;

/// The shape of the ring: how many machines there are and where they listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of machines in the ring
    pub machines: usize,
    /// Machine `i` listens on `base_port + i`
    pub base_port: u16,
    /// The address every machine binds and connects on
    pub host: IpAddr,
}

impl RingConfig {
    pub fn new(machines: usize, base_port: u16) -> Self {
        Self {
            machines,
            base_port,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// The machine that `id` connects out to.
    pub fn successor(&self, id: usize) -> usize {
        (id + 1) % self.machines
    }

    /// The machine that connects in to `id`.
    pub fn predecessor(&self, id: usize) -> usize {
        (id + self.machines - 1) % self.machines
    }

    /// The address machine `id` listens on.
    pub fn address(&self, id: usize) -> Result<SocketAddr, ConfigError> {
        let port = u16::try_from(id)
            .ok()
            .and_then(|id| self.base_port.checked_add(id))
            .ok_or(ConfigError::PortOverflow {
                base_port: self.base_port,
                id,
            })?;
        Ok(SocketAddr::new(self.host, port))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.machines == 0 {
            return Err(ConfigError::EmptyRing);
        }
        self.address(self.machines - 1)?;
        Ok(())
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new(3, 5000)
    }
}

/// Everything a [`Machine`](crate::Machine) needs to know before it starts.
///
/// Built with chained setters:
///
/// ```
/// use ringclock_core::{MachineConfig, RingConfig};
/// use std::time::Duration;
///
/// let config = MachineConfig::new(1, RingConfig::new(3, 5000))
///     .rate(4)
///     .duration(Duration::from_secs(30))
///     .seed(262);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// This machine's position in the ring
    pub id: usize,
    pub ring: RingConfig,
    /// A fixed event rate. When unset one is drawn from `rate_range`.
    pub rate: Option<u32>,
    /// The range event rates are drawn from, in iterations per second
    pub rate_range: RangeInclusive<u32>,
    /// How long the event loop runs once both links are up
    pub duration: Duration,
    /// How long to wait after starting each link task
    pub settle: Duration,
    /// How long the outbound link waits before its first connection attempt
    pub connect_delay: Duration,
    /// How long to wait between connection attempts
    pub connect_retry: Duration,
    /// The longest a single read blocks before the read loop checks its flags
    pub read_timeout: Duration,
    /// How long cleanup waits for read loops to notice the shutdown
    pub grace: Duration,
    /// How long to wait after the event loop ends before cleaning up
    pub linger: Duration,
    /// Seeds the rate draw and the task draw, for reproducible runs
    pub seed: Option<u64>,
}

impl MachineConfig {
    /// Creates the default configuration for machine `id` of `ring`.
    pub fn new(id: usize, ring: RingConfig) -> Self {
        Self {
            id,
            ring,
            rate: None,
            rate_range: 1..=6,
            duration: Duration::from_secs(60),
            settle: Duration::from_secs(5),
            connect_delay: Duration::from_secs(1),
            connect_retry: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            grace: Duration::from_secs(2),
            linger: Duration::from_secs(5),
            seed: None,
        }
    }

    pub fn rate(mut self, rate: u32) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn rate_range(mut self, rate_range: RangeInclusive<u32>) -> Self {
        self.rate_range = rate_range;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn connect_delay(mut self, connect_delay: Duration) -> Self {
        self.connect_delay = connect_delay;
        self
    }

    pub fn connect_retry(mut self, connect_retry: Duration) -> Self {
        self.connect_retry = connect_retry;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks the settings for values a machine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ring.validate()?;
        if self.id >= self.ring.machines {
            return Err(ConfigError::InvalidId {
                id: self.id,
                machines: self.ring.machines,
            });
        }
        match self.rate {
            Some(0) => return Err(ConfigError::ZeroRate),
            Some(_) => {}
            None => {
                if self.rate_range.is_empty() || *self.rate_range.start() == 0 {
                    return Err(ConfigError::InvalidRateRange(self.rate_range.clone()));
                }
            }
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }
        Ok(())
    }

    /// The address this machine listens on.
    pub fn listen_address(&self) -> Result<SocketAddr, ConfigError> {
        self.ring.address(self.id)
    }

    /// The address of the successor this machine connects to.
    pub fn peer_address(&self) -> Result<SocketAddr, ConfigError> {
        self.ring.address(self.ring.successor(self.id))
    }

    /// Seeds an RNG for this machine. Machines sharing a seed still draw
    /// different streams because the id is mixed in.
    pub(crate) fn rng(&self) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed ^ (self.id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)),
            None => SmallRng::from_entropy(),
        }
    }

    /// Picks the event rate: the fixed one if set, otherwise a draw.
    pub(crate) fn pick_rate(&self, rng: &mut SmallRng) -> u32 {
        self.rate
            .unwrap_or_else(|| rng.gen_range(self.rate_range.clone()))
    }

    /// Fixes the event rate, drawing it now if none is set, so it is known
    /// before the machine is built.
    ///
    /// Panics on an empty rate range; call [`validate`](Self::validate) first.
    pub fn resolve_rate(&mut self) -> u32 {
        let rate = self.pick_rate(&mut self.rng());
        self.rate = Some(rate);
        rate
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("A ring needs at least one machine")]
    EmptyRing,
    #[error("Machine {id} is outside a ring of {machines}")]
    InvalidId { id: usize, machines: usize },
    #[error("Port {base_port} + {id} does not fit in a port number")]
    PortOverflow { base_port: u16, id: usize },
    #[error("The event rate must be at least 1")]
    ZeroRate,
    #[error("Invalid event rate range {0:?}")]
    InvalidRateRange(RangeInclusive<u32>),
    #[error("The read timeout must be longer than zero")]
    ZeroReadTimeout,
}
