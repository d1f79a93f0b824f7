//! Owns the application's long-running tasks and their shutdown.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// How each managed task ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub graceful: Vec<&'static str>,
    pub panicked: Vec<&'static str>,
    /// Tasks still running at the deadline, which were aborted.
    pub aborted: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty() && self.aborted.is_empty()
    }
}

/// The named top-level tasks (session server, metrics server) and the
/// shutdown receiver they all watch.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks not yet awaited.
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `grace` for every task to finish, then aborts the rest.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!(tasks = handles.len(), ?grace, "Waiting for tasks to finish");

        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();
        for (name, mut handle) in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {
                    debug!(task_name = name, "Task finished");
                    report.graceful.push(name);
                }
                Ok(Err(e)) => {
                    error!(task_name = name, error = %e, "Task panicked");
                    report.panicked.push(name);
                }
                Err(_) => {
                    warn!(task_name = name, "Task missed the shutdown deadline, aborting");
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }
        report
    }
}
