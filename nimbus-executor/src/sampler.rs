//! Host metrics sampling, run inside the worker process.

use std::time::Duration;

use nimbus_core::{MetricsSample, VmId};
use sysinfo::System;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ExecutorError;

/// Reads host-wide CPU and memory utilisation.
#[derive(Debug)]
pub struct HostSampler {
    system: System,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    /// Create a sampler and take the baseline CPU reading.
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }

    /// Take one reading.
    ///
    /// CPU usage is a delta between two refreshes, so this waits
    /// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] before reading.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Sample`] if the host reports values outside
    /// `[0, 100]` after clamping, which only happens for NaN.
    pub async fn sample(&mut self) -> Result<MetricsSample, ExecutorError> {
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu = self.system.global_cpu_usage().clamp(0.0, 100.0);
        let mem = memory_percent(self.system.used_memory(), self.system.total_memory());
        Ok(MetricsSample::new(cpu, mem)?)
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn memory_percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let percent = used as f64 / total as f64 * 100.0;
    percent.clamp(0.0, 100.0) as f32
}

/// Sample forever, writing one protocol line per reading to `out`.
///
/// Returns only when writing fails, e.g. because the supervisor closed the
/// pipe. Termination is otherwise external.
///
/// # Errors
/// Returns [`ExecutorError::Io`] when `out` is closed and
/// [`ExecutorError::Sample`] if a reading cannot be encoded.
pub async fn run_sampling_loop<W>(
    vm_id: VmId,
    interval: Duration,
    sampler: &mut HostSampler,
    out: &mut W,
) -> Result<(), ExecutorError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let sample = sampler.sample().await?;
        let mut line = sample.to_line()?;
        line.push('\n');
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        tracing::debug!(
            vm_id = %vm_id,
            cpu = sample.cpu_percent,
            memory = sample.mem_percent,
            "sample written"
        );
        tokio::time::sleep(interval).await;
    }
}
