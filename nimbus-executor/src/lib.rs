//! VM lifecycle management for the Nimbus cloud simulator.
//!
//! Simulated VMs are backed by real worker processes that stream host
//! metrics over stdout. This crate owns the registry those samples land in,
//! the per-VM network table, and the state machine tying them together.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod backend;
pub mod config;
pub mod error;
pub mod handle;
pub mod manager;
pub mod network;
pub mod process;
pub mod registry;
pub mod sampler;

pub use backend::WorkerBackend;
pub use config::WorkerConfig;
pub use error::{AllocationError, ExecutorError};
pub use handle::{Termination, WorkerHandle, WorkerProcess};
pub use manager::{OpOutcome, VmLifecycleManager};
pub use network::{MemberRemoval, NetworkAllocator, NetworkEntry};
pub use process::ProcessBackend;
pub use registry::{VmRecord, VmRegistry};
pub use sampler::HostSampler;
