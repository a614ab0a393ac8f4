//! HTTP API gateway for the Nimbus cloud simulator.
//!
//! Exposes VM lifecycle, bucket storage and edge-cache endpoints over a
//! single axum router.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod routes;
