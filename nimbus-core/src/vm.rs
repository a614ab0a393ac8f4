use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::CoreError;
use crate::id::VmId;

/// Message carried by an empty VM listing.
pub const EMPTY_LISTING_MESSAGE: &str = "No VMs running!";

/// Lifecycle state of a VM that has a registry record.
///
/// A VM without a record was never created or has been deleted; there is
/// no variant for that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    /// A worker process is sampling metrics and an IP is assigned.
    Running,
    /// No worker, no IP, no metrics. The record remains as a tombstone.
    Stopped,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// One host utilisation reading produced by a worker.
///
/// Both values are percentages in `[0.0, 100.0]`. This is also the wire
/// format of the worker protocol: one JSON object per stdout line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSample")]
pub struct MetricsSample {
    /// Host-wide CPU utilisation.
    pub cpu_percent: f32,
    /// Host-wide memory utilisation.
    pub mem_percent: f32,
}

#[derive(Deserialize)]
struct RawSample {
    cpu_percent: f32,
    mem_percent: f32,
}

impl TryFrom<RawSample> for MetricsSample {
    type Error = CoreError;

    fn try_from(raw: RawSample) -> Result<Self, Self::Error> {
        Self::new(raw.cpu_percent, raw.mem_percent)
    }
}

impl MetricsSample {
    /// Creates a sample from two percentages.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPercentage`] if either value is NaN,
    /// infinite, or outside `[0.0, 100.0]`.
    pub fn new(cpu_percent: f32, mem_percent: f32) -> Result<Self, CoreError> {
        check_percentage("cpu", cpu_percent)?;
        check_percentage("memory", mem_percent)?;
        Ok(Self { cpu_percent, mem_percent })
    }

    /// Parses one line of worker output.
    ///
    /// # Errors
    /// Returns [`CoreError::MalformedSample`] for invalid JSON and
    /// [`CoreError::InvalidPercentage`] for out-of-range values.
    pub fn from_line(line: &str) -> Result<Self, CoreError> {
        let raw: RawSample = serde_json::from_str(line.trim())?;
        Self::try_from(raw)
    }

    /// Renders the sample as a single protocol line, without the newline.
    ///
    /// # Errors
    /// Propagates serializer failures, which cannot occur for finite values.
    pub fn to_line(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn check_percentage(metric: &'static str, value: f32) -> Result<(), CoreError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::InvalidPercentage { metric, value })
    }
}

/// Point-in-time view of one VM, as returned by monitor and list.
///
/// Field names follow the public JSON shape; absent values serialize as
/// `null` rather than being omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSnapshot {
    /// The VM this snapshot describes.
    pub vm_id: VmId,
    /// Current lifecycle state.
    pub status: VmStatus,
    /// OS process id of the worker while running.
    pub pid: Option<u32>,
    /// Most recent CPU sample.
    pub cpu: Option<f32>,
    /// Most recent memory sample.
    pub memory: Option<f32>,
    /// Assigned address while running.
    pub ip: Option<String>,
}

/// Result of listing every VM.
///
/// An empty registry is reported with an explicit marker instead of an
/// empty sequence, and serializes as `{"message": "No VMs running!"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum VmListing {
    /// The registry holds no records.
    Empty,
    /// All records, in insertion order.
    Vms(Vec<VmSnapshot>),
}

impl VmListing {
    /// Builds a listing, mapping an empty sequence to [`VmListing::Empty`].
    #[must_use]
    pub fn from_snapshots(snapshots: Vec<VmSnapshot>) -> Self {
        if snapshots.is_empty() {
            Self::Empty
        } else {
            Self::Vms(snapshots)
        }
    }

    /// Snapshots in the listing; empty for [`VmListing::Empty`].
    #[must_use]
    pub fn snapshots(&self) -> &[VmSnapshot] {
        match self {
            Self::Empty => &[],
            Self::Vms(vms) => vms,
        }
    }
}

impl Serialize for VmListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Empty => map.serialize_entry("message", EMPTY_LISTING_MESSAGE)?,
            Self::Vms(vms) => map.serialize_entry("vms", vms)?,
        }
        map.end()
    }
}
