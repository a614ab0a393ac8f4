//! Worker backend abstraction trait.
//!
//! Separates how a metrics worker is started and stopped from the
//! lifecycle state machine that decides when.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::VmId;

use crate::{ExecutorError, Termination, VmRegistry, WorkerHandle};

/// Starts and stops the isolated unit of execution behind a VM.
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Start a worker for `vm_id` whose samples land in `registry`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::SpawnFailed`] if the worker cannot be started.
    async fn spawn(
        &self,
        vm_id: VmId,
        registry: Arc<VmRegistry>,
    ) -> Result<WorkerHandle, ExecutorError>;

    /// Stop a worker: request termination, wait a bounded time, then kill.
    ///
    /// A forced kill is not an error; it is reported as
    /// [`Termination::ForceKilled`].
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if the process can neither be signalled
    /// nor killed.
    async fn terminate(
        &self,
        vm_id: VmId,
        handle: &WorkerHandle,
    ) -> Result<Termination, ExecutorError>;
}
