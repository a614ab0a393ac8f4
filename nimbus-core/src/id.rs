use std::fmt;

use serde::{Deserialize, Serialize};

/// Caller-supplied identifier of a simulated VM.
///
/// Unique key of the VM registry. Callers pick the value; nothing in the
/// system generates VM ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(pub u32);

impl VmId {
    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VmId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Identifier of a virtual network.
///
/// Every VM owns exactly one network whose id equals the VM id, so the
/// two convert freely in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(pub u32);

impl NetworkId {
    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<VmId> for NetworkId {
    fn from(vm_id: VmId) -> Self {
        Self(vm_id.0)
    }
}
