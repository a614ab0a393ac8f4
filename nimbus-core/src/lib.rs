//! Core types for the Nimbus cloud simulator.
//!
//! Defines the identifiers, VM status model, worker metrics samples and the
//! error classification shared by the executor, storage and gateway crates.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod id;
pub mod vm;

pub use error::{CoreError, ErrorKind};
pub use id::{NetworkId, VmId};
pub use vm::{MetricsSample, VmListing, VmSnapshot, VmStatus, EMPTY_LISTING_MESSAGE};
