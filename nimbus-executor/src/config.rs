//! Worker process configuration.

use std::path::PathBuf;
use std::time::Duration;

/// How often a worker samples host metrics unless configured otherwise.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// How long a worker gets to exit after SIGTERM before it is force-killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable carrying the VM id into every spawned worker.
pub const VM_ID_ENV: &str = "NIMBUS_VM_ID";

/// Environment variable carrying the sampling interval in milliseconds.
pub const SAMPLE_INTERVAL_ENV: &str = "NIMBUS_SAMPLE_INTERVAL_MS";

/// Configuration for spawning metrics worker processes.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct WorkerConfig {
    /// Program to execute for every worker (normally `nimbus-worker`).
    pub program: PathBuf,

    /// Extra arguments passed before anything the backend adds.
    pub args: Vec<String>,

    /// Interval between two samples inside the worker.
    pub sample_interval: Duration,

    /// Bounded wait between SIGTERM and SIGKILL.
    pub stop_timeout: Duration,
}

impl WorkerConfig {
    /// Create a config for `program` with default interval and timeout.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Replace the extra arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Override the sampling interval.
    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Override the SIGTERM grace period.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}
