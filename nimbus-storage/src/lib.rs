//! Bucket storage and origin-to-edge replication for the Nimbus cloud
//! simulator.
//!
//! Both stores are plain directory trees. They share no state with the VM
//! lifecycle core.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod blob;
pub mod cdn;
pub mod error;

pub use blob::BlobStore;
pub use cdn::{EdgeCache, EdgeFetch, DEFAULT_EDGES, ORIGIN_DIR};
pub use error::StorageError;
