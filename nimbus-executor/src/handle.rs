//! Worker handle: represents a running metrics worker process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nimbus_core::ErrorKind;
use serde::Serialize;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::ExecutorError;

/// A cheap, clonable handle to one worker process.
///
/// Clones share the same child process. Dropping the last clone kills the
/// process (`kill_on_drop`); call [`WorkerBackend::terminate`] to shut it
/// down with the bounded SIGTERM, SIGKILL sequence instead.
///
/// [`WorkerBackend::terminate`]: crate::WorkerBackend::terminate
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pid: u32,
    started_at: DateTime<Utc>,
    process: Arc<Mutex<WorkerProcess>>,
}

/// Owned state behind a [`WorkerHandle`].
#[derive(Debug)]
pub struct WorkerProcess {
    /// The worker child process.
    pub child: Child,
    /// Task forwarding the worker's samples into the registry.
    pub pump: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Wrap a freshly spawned child.
    ///
    /// # Errors
    /// Returns [`ExecutorError::SpawnFailed`] if the child already exited
    /// and has no pid.
    pub fn new(child: Child, pump: Option<JoinHandle<()>>) -> Result<Self, ExecutorError> {
        let pid = child
            .id()
            .ok_or_else(|| ExecutorError::SpawnFailed("worker exited during spawn".to_owned()))?;
        Ok(Self {
            pid,
            started_at: Utc::now(),
            process: Arc::new(Mutex::new(WorkerProcess { child, pump })),
        })
    }

    /// OS process id of the worker.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// When the worker was spawned.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Exclusive access to the child and its pump task.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, WorkerProcess> {
        self.process.lock().await
    }
}

/// How a worker went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Ignored SIGTERM and was killed with SIGKILL.
    ForceKilled,
}

impl Termination {
    /// The warning to surface alongside a successful stop or delete.
    #[must_use]
    pub fn warning(self) -> Option<ErrorKind> {
        match self {
            Self::Graceful => None,
            Self::ForceKilled => Some(ErrorKind::TerminationTimeout),
        }
    }
}
