//! Cancellation and graceful shutdown for background work.
//!
//! Every periodic or long-running task in tidelog (ISR rechecks, follower
//! pullers, ISR reports, the RPC server) runs as a [`BackgroundTask`]. A task
//! owns a [`ShutdownCoordinator`]; stopping it signals the coordinator and
//! awaits the task with a bounded timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Maximum time to wait for a task to finish after it was told to stop.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown signal shared between an owner and its tasks.
///
/// Clones observe the same signal. Once raised it stays raised.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    signal: Arc<watch::Sender<bool>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// `timeout` bounds how long [`BackgroundTask::stop`] waits.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
            timeout,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    /// Raises the signal. Later calls are no-ops.
    pub fn shutdown(&self) {
        self.signal.send_if_modified(|raised| !std::mem::replace(raised, true));
    }

    /// Resolves once the signal is raised.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.signal.subscribe();
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Sleeps for `duration`, returning `false` early if shutdown starts.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// A named tokio task that can be told to stop and then awaited.
pub struct BackgroundTask {
    name: String,
    coordinator: ShutdownCoordinator,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawns `task` with a fresh coordinator.
    pub fn spawn<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(ShutdownCoordinator) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_with(name, ShutdownCoordinator::new(), task)
    }

    /// Spawns `task` bound to an existing coordinator.
    pub fn spawn_with<F, Fut>(name: impl Into<String>, coordinator: ShutdownCoordinator, task: F) -> Self
    where
        F: FnOnce(ShutdownCoordinator) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!(task = %name, "Starting background task");
        let handle = tokio::spawn(task(coordinator.clone()));
        Self {
            name,
            coordinator,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signals the task without waiting for it.
    pub fn signal(&self) {
        self.coordinator.shutdown();
    }

    /// Signals the task and waits up to the coordinator timeout.
    pub async fn stop(mut self) {
        self.coordinator.shutdown();
        let Some(handle) = self.handle.take() else {
            return;
        };

        let timeout = self.coordinator.timeout();
        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => debug!(task = %self.name, "Background task stopped"),
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => error!(task = %self.name, error = %e, "Background task panicked"),
            Err(_) => {
                warn!(task = %self.name, timeout_ms = timeout.as_millis() as u64, "Background task did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.coordinator.shutdown();
            handle.abort();
        }
    }
}

/// Stops a batch of tasks concurrently.
pub async fn stop_all(tasks: Vec<BackgroundTask>) {
    for task in &tasks {
        task.signal();
    }
    futures::future::join_all(tasks.into_iter().map(BackgroundTask::stop)).await;
}

/// Turns process signals into a shutdown.
pub struct SignalHandler {
    coordinator: ShutdownCoordinator,
}

impl SignalHandler {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Waits for SIGTERM or SIGINT and raises the shutdown signal. Also
    /// returns when shutdown was started elsewhere.
    #[cfg(unix)]
    pub async fn run(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                self.coordinator.shutdown();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = self.coordinator.wait_for_shutdown() => {}
        }

        self.coordinator.shutdown();
    }

    #[cfg(windows)]
    pub async fn run(self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
            },
            _ = self.coordinator.wait_for_shutdown() => {}
        }
        self.coordinator.shutdown();
    }
}
