//! Runs one machine in this process, or the whole ring as child processes.

use crate::{
    cli::{initialize_logging, Args, CliError},
    recorder::CsvRecorder,
};
use ringclock_core::{ExitStatus, Machine};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::process::{Child, Command};

/// How long the launcher waits for interrupted children before killing them.
const CHILD_GRACE: Duration = Duration::from_secs(10);

/// The directories a run writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirs {
    pub logs: PathBuf,
    pub tables: PathBuf,
}

impl LogDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            logs: root.join("logs"),
            tables: root.join("csvs"),
        }
    }

    /// Creates both directories if they are missing.
    pub fn create(root: &Path) -> Result<Self, CliError> {
        let dirs = Self::new(root);
        for path in [&dirs.logs, &dirs.tables] {
            fs::create_dir_all(path).map_err(|source| CliError::CreateDir {
                path: path.clone(),
                source,
            })?;
        }
        Ok(dirs)
    }

    pub fn log_file(&self, id: usize) -> PathBuf {
        self.logs.join(format!("log_{id}.log"))
    }

    pub fn table_file(&self, id: usize, rate: u32) -> PathBuf {
        self.tables.join(CsvRecorder::file_name(id, rate))
    }
}

/// Runs machine `id` to completion: connects it into the ring, runs its event
/// loop, lingers so late messages still arrive, then cleans up.
pub async fn run_machine(args: &Args, id: usize) -> Result<(), CliError> {
    let mut config = args.machine_config(id);
    config.validate()?;
    let dirs = LogDirs::create(&args.log_dir)?;
    initialize_logging(args.log.then(|| dirs.log_file(id)))?;

    let rate = config.resolve_rate();
    let recorder = Arc::new(CsvRecorder::create(dirs.table_file(id, rate))?);
    let machine = Machine::new(config, recorder)?;

    let shutdown = machine.shutdown();
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Keyboard interrupt detected. Exiting program...");
        shutdown.shut_down_with_status(ExitStatus::Interrupted);
    });

    let result = machine.run().await;
    if let Ok(ExitStatus::TimedOut) = result {
        let shutdown = machine.shutdown();
        tokio::select! {
            _ = tokio::time::sleep(machine.config().linger) => {}
            _ = shutdown.cancelled() => {}
        }
    }
    machine.cleanup().await;
    signals.abort();

    let status = result?;
    tracing::info!(machine = id, "Exited: {:?}", status);
    Ok(())
}

/// Starts one child process per machine and waits for all of them.
pub async fn run_ring(args: &Args) -> Result<(), CliError> {
    let program = env::current_exe().map_err(|source| CliError::Spawn { id: 0, source })?;
    let mut children = Vec::with_capacity(args.machines);
    for id in 0..args.machines {
        let child = Command::new(&program)
            .args(args.child_args(id))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CliError::Spawn { id, source })?;
        tracing::info!("Started machine {}", id);
        children.push((id, child));
    }

    let outcome = tokio::select! {
        failed = wait_for_children(&mut children) => Some(failed),
        _ = wait_for_signal() => None,
    };
    let failed = match outcome {
        Some(failed) => failed,
        None => {
            tracing::info!("Keyboard interrupt detected. Stopping machines...");
            stop_children(&mut children).await
        }
    };

    if failed.is_empty() {
        tracing::info!("All machines finished");
        Ok(())
    } else {
        Err(CliError::MachinesFailed(failed))
    }
}

/// Waits for every child in turn and returns the ids of those that failed.
async fn wait_for_children(children: &mut [(usize, Child)]) -> Vec<usize> {
    let mut failed = Vec::new();
    for (id, child) in children.iter_mut() {
        match child.wait().await {
            Ok(status) if status.success() => tracing::info!("Machine {} exited", id),
            Ok(status) => {
                tracing::error!("Machine {} exited with {}", id, status);
                failed.push(*id);
            }
            Err(e) => {
                tracing::error!("Lost track of machine {}: {}", id, e);
                failed.push(*id);
            }
        }
    }
    failed
}

/// Passes SIGTERM on to every child, gives them time to clean up, then kills
/// what is left.
async fn stop_children(children: &mut [(usize, Child)]) -> Vec<usize> {
    for (id, child) in children.iter() {
        if let Err(e) = terminate(child) {
            tracing::warn!("Failed to interrupt machine {}: {}", id, e);
        }
    }
    match tokio::time::timeout(CHILD_GRACE, wait_for_children(children)).await {
        Ok(failed) => failed,
        Err(_) => {
            let mut failed = Vec::new();
            for (id, child) in children.iter_mut() {
                if let Ok(None) = child.try_wait() {
                    tracing::warn!("Killing machine {}", id);
                    if let Err(e) = child.kill().await {
                        tracing::error!("Failed to kill machine {}: {}", id, e);
                    }
                    failed.push(*id);
                }
            }
            failed
        }
    }
}

#[cfg(unix)]
fn terminate(child: &Child) -> io::Result<()> {
    // Already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: kill only sends a signal and touches no memory of ours
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Without SIGTERM the children only stop once the grace period ends.
#[cfg(not(unix))]
fn terminate(_child: &Child) -> io::Result<()> {
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where there is one.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
