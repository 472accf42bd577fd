use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// A struct which can be used to shut down a machine.
/// You can create multiple connected shutdowns by cloning.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Cancelled once anyone asks the machine to shut down.
    token: CancellationToken,
    /// The first status sent, so every clone reports the same reason
    status: Arc<Mutex<Option<ExitStatus>>>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            status: Default::default(),
        }
    }

    /// Sends `ExitStatus::Exited` to all `Shutdowns` cloned from this one.
    pub fn shut_down(&self) {
        self.shut_down_with_status(ExitStatus::Exited)
    }

    /// Sends `status` to all `Shutdowns` cloned from this one. Only the first
    /// status sent is kept.
    pub fn shut_down_with_status(&self, status: ExitStatus) {
        {
            let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_none() {
                *current = Some(status);
            } else {
                tracing::debug!("Already shutting down, ignoring {:?}", status);
            }
        }
        self.token.cancel();
    }

    /// Whether a shutdown has been requested.
    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The status sent, if a shutdown has been requested.
    pub fn status(&self) -> Option<ExitStatus> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until a shutdown is requested, without reading the status. Can
    /// be used inside `select!` next to other work.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Waits to receive a shutdown status.
    pub async fn wait_for_shutdown(&self) -> ExitStatus {
        self.token.cancelled().await;
        self.status().unwrap_or(ExitStatus::Exited)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a machine stopped running.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
    /// Asked to stop by the program.
    Exited,
    /// The run duration elapsed.
    TimedOut,
    /// Stopped by an interrupt or termination signal.
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_active() {
        let shut0 = Shutdown::new();
        let shuts = [shut0.clone(), shut0.clone(), shut0.clone()];
        assert!(!shut0.is_shut_down());
        assert_eq!(shut0.status(), None);

        shuts[0].shut_down_with_status(ExitStatus::Interrupted);

        for shut in shuts {
            assert!(shut.is_shut_down());
            assert_eq!(shut.wait_for_shutdown().await, ExitStatus::Interrupted);
        }
    }

    #[tokio::test]
    async fn first_status_wins() {
        let shutdown = Shutdown::new();
        shutdown.shut_down_with_status(ExitStatus::TimedOut);
        shutdown.shut_down();
        assert_eq!(shutdown.wait_for_shutdown().await, ExitStatus::TimedOut);
        assert_eq!(shutdown.clone().status(), Some(ExitStatus::TimedOut));
    }

    #[tokio::test]
    async fn wakes_waiting_tasks() {
        let shutdown = Shutdown::new();
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait_for_shutdown().await }
        });
        tokio::task::yield_now().await;
        shutdown.shut_down();
        assert_eq!(waiter.await.unwrap(), ExitStatus::Exited);
    }
}
