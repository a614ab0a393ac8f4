//! Error types for the executor crate.

use nimbus_core::{CoreError, ErrorKind, NetworkId, VmId};

/// Errors raised by the network allocator when it is driven out of the
/// create, use, delete order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AllocationError {
    /// `create_network` was called twice for the same id without a delete.
    #[error("network {0} already exists")]
    AlreadyExists(NetworkId),

    /// The network was never created or has already been reclaimed.
    #[error("network {0} does not exist")]
    UnknownNetwork(NetworkId),

    /// The VM is not in the network's member set.
    #[error("VM {vm_id} is not a member of network {network_id}")]
    NotAMember { network_id: NetworkId, vm_id: VmId },
}

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// No record exists for the VM.
    #[error("VM {0} not found!")]
    VmNotFound(VmId),

    /// `start` on a VM that is already running.
    #[error("VM {0} already running!")]
    AlreadyRunning(VmId),

    /// `stop` on a VM that is already stopped.
    #[error("VM {0} already stopped!")]
    AlreadyStopped(VmId),

    /// Network bookkeeping was out of order; the operation was abandoned.
    #[error("network allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// The worker process could not be started.
    #[error("worker spawn failed: {0}")]
    SpawnFailed(String),

    /// A metrics sample could not be produced or encoded.
    #[error(transparent)]
    Sample(#[from] CoreError),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Classification used at the request boundary.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::VmNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyRunning(_) | Self::AlreadyStopped(_) => ErrorKind::Conflict,
            Self::Allocation(_) => ErrorKind::AllocationInconsistency,
            Self::SpawnFailed(_) | Self::Sample(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}
