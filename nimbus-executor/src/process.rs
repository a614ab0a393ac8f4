//! Process-backed workers.
//!
//! Each worker is a separate OS process that prints one JSON sample per
//! stdout line. A pump task on the supervisor side parses those lines and
//! publishes them through [`VmRegistry::update_metrics`], which is the only
//! path from a worker back into shared state.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::{MetricsSample, VmId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};

use crate::config::{SAMPLE_INTERVAL_ENV, VM_ID_ENV};
use crate::{ExecutorError, Termination, VmRegistry, WorkerBackend, WorkerConfig, WorkerHandle};

/// Upper bound on waiting for the pump to see EOF after the worker exits.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Worker backend that runs each worker as a child process.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    config: WorkerConfig,
}

impl ProcessBackend {
    /// Create a backend spawning workers according to `config`.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerBackend for ProcessBackend {
    async fn spawn(
        &self,
        vm_id: VmId,
        registry: Arc<VmRegistry>,
    ) -> Result<WorkerHandle, ExecutorError> {
        let interval_ms = self.config.sample_interval.as_millis();

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .env(VM_ID_ENV, vm_id.to_string())
            .env(SAMPLE_INTERVAL_ENV, interval_ms.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutorError::SpawnFailed(format!("exec {}: {e}", self.config.program.display()))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::SpawnFailed("stdout not piped".to_owned()))?;

        let pump = tokio::spawn(pump_samples(vm_id, stdout, registry));
        let handle = WorkerHandle::new(child, Some(pump))?;

        tracing::info!(vm_id = %vm_id, pid = handle.pid(), interval_ms, "worker spawned");

        Ok(handle)
    }

    async fn terminate(
        &self,
        vm_id: VmId,
        handle: &WorkerHandle,
    ) -> Result<Termination, ExecutorError> {
        let pid = handle.pid();
        let mut process = handle.lock().await;

        tracing::info!(vm_id = %vm_id, pid, "terminating worker");

        if process.child.try_wait()?.is_none() {
            request_termination(&mut process.child, pid)?;
        }

        let waited = tokio::time::timeout(self.config.stop_timeout, process.child.wait()).await;
        let termination = match waited {
            Ok(status) => {
                let status = status?;
                tracing::debug!(vm_id = %vm_id, pid, %status, "worker exited");
                Termination::Graceful
            }
            Err(_) => {
                tracing::warn!(
                    vm_id = %vm_id,
                    pid,
                    timeout_ms = self.config.stop_timeout.as_millis(),
                    "worker ignored SIGTERM, escalating to SIGKILL"
                );
                process.child.kill().await?;
                Termination::ForceKilled
            }
        };

        // Drain the pump so no sample from this worker lands after we return.
        if let Some(pump) = process.pump.take() {
            let abort = pump.abort_handle();
            if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
                tracing::warn!(vm_id = %vm_id, pid, "sample pump did not drain, aborting it");
                abort.abort();
            }
        }

        let uptime_ms = (chrono::Utc::now() - handle.started_at()).num_milliseconds();
        tracing::info!(vm_id = %vm_id, pid, uptime_ms, ?termination, "worker terminated");

        Ok(termination)
    }
}

/// Forward every sample line from a worker into the registry until EOF.
async fn pump_samples(vm_id: VmId, stdout: ChildStdout, registry: Arc<VmRegistry>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match MetricsSample::from_line(&line) {
                Ok(sample) => {
                    if !registry.update_metrics(vm_id, sample) {
                        tracing::trace!(vm_id = %vm_id, "sample dropped, VM not running");
                    }
                }
                Err(e) => {
                    tracing::warn!(vm_id = %vm_id, error = %e, "discarding malformed output");
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(vm_id = %vm_id, error = %e, "reading worker output failed");
                break;
            }
        }
    }
    tracing::debug!(vm_id = %vm_id, "worker output closed");
}

#[cfg(unix)]
fn request_termination(_child: &mut tokio::process::Child, pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("pid {pid} out of range"))
    })?;
    // SAFETY: kill(2) takes no pointers; `pid` is our own child, not yet
    // reaped, so it cannot have been recycled for another process.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Exited between try_wait and kill.
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
fn request_termination(child: &mut tokio::process::Child, _pid: u32) -> std::io::Result<()> {
    child.start_kill()
}
