//! Parses the command line arguments.
//!
//! Without `--id` the process is the launcher: it starts every machine of
//! the ring as a child process of the same binary. With `--id` it runs that
//! one machine.
//!
//! ```text
//! cargo run --bin ringclock -- --duration 30 --seed 262 --log
//! ```

use crate::launcher::{run_machine, run_ring};
use clap::Parser;
use ringclock_core::{config::ConfigError, MachineConfig, MachineError, RingConfig};
use std::{
    ffi::OsString,
    fs::OpenOptions,
    io,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error as ThisError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Stores the different command line arguments.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(version, about = "A ring of machines keeping Lamport clocks")]
pub struct Args {
    /// Run only the machine with this id. Without it, every machine is
    /// started as a child process.
    #[arg(long)]
    pub id: Option<usize>,
    /// Number of machines in the ring
    #[arg(short, long, default_value_t = 3)]
    pub machines: usize,
    /// Machine `i` listens on `base_port + i`
    #[arg(short = 'p', long, default_value_t = 5000)]
    pub base_port: u16,
    /// Address the machines listen and connect on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,
    /// How long each machine runs its event loop, in seconds
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,
    /// A fixed event rate for every machine, in events per second
    #[arg(short, long)]
    pub rate: Option<u32>,
    /// Lowest event rate a machine can be assigned
    #[arg(long, default_value_t = 1)]
    pub min_rate: u32,
    /// Highest event rate a machine can be assigned
    #[arg(long, default_value_t = 6)]
    pub max_rate: u32,
    /// Seed for the rate and task draws
    #[arg(short, long)]
    pub seed: Option<u64>,
    /// Where the logs and event tables are written
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
    /// Write the log to a JSON file in the log directory instead of stderr
    #[arg(short, long)]
    pub log: bool,
}

impl Args {
    pub fn ring(&self) -> RingConfig {
        RingConfig::new(self.machines, self.base_port).host(self.host)
    }

    /// The configuration of machine `id`.
    pub fn machine_config(&self, id: usize) -> MachineConfig {
        let mut config = MachineConfig::new(id, self.ring())
            .rate_range(self.min_rate..=self.max_rate)
            .duration(Duration::from_secs(self.duration));
        if let Some(rate) = self.rate {
            config = config.rate(rate);
        }
        if let Some(seed) = self.seed {
            config = config.seed(seed);
        }
        config
    }

    /// The arguments the launcher passes to the child running machine `id`.
    pub fn child_args(&self, id: usize) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--id".into(),
            id.to_string().into(),
            "--machines".into(),
            self.machines.to_string().into(),
            "--base-port".into(),
            self.base_port.to_string().into(),
            "--host".into(),
            self.host.to_string().into(),
            "--duration".into(),
            self.duration.to_string().into(),
            "--min-rate".into(),
            self.min_rate.to_string().into(),
            "--max-rate".into(),
            self.max_rate.to_string().into(),
            "--log-dir".into(),
            self.log_dir.clone().into(),
        ];
        if let Some(rate) = self.rate {
            args.extend(["--rate".into(), rate.to_string().into()]);
        }
        if let Some(seed) = self.seed {
            args.extend(["--seed".into(), seed.to_string().into()]);
        }
        if self.log {
            args.push("--log".into());
        }
        args
    }
}

/// Parses the command line and runs the launcher or a single machine.
pub async fn initialize_from_arguments() -> Result<(), CliError> {
    let args = Args::parse();
    match args.id {
        Some(id) => run_machine(&args, id).await,
        None => {
            // Catch bad arguments before any child is started
            args.machine_config(0).validate()?;
            initialize_logging(None)?;
            run_ring(&args).await
        }
    }
}

/// Installs the global subscriber. With a path, events are written to that
/// file as JSON; otherwise they go to stderr. Only call once per process.
pub fn initialize_logging(log_file: Option<PathBuf>) -> Result<(), CliError> {
    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .create(true)
                .open(&path)
                .map_err(|source| CliError::LogFile { path, source })?;
            let subscriber = FmtSubscriber::builder()
                .with_writer(Arc::new(file))
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(Level::INFO)
                .with_writer(io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    result.map_err(|e| CliError::Logging(e.to_string()))
}

#[derive(Debug, ThisError)]
pub enum CliError {
    #[error("Invalid arguments: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to create {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create event table {path:?}: {source}")]
    EventTable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Could not set up logging: {0}")]
    Logging(String),
    #[error("Failed to start machine {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("Machines {0:?} did not exit cleanly")]
    MachinesFailed(Vec<usize>),
}
