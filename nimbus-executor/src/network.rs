//! Per-VM virtual network bookkeeping and IP assignment.
//!
//! Each VM gets its own network, keyed by the VM id. Addresses have the
//! shape `192.168.<network>.<host>` with a random host part in `1..=254`.
//! Uniqueness is not tracked; only the format is guaranteed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use nimbus_core::{NetworkId, VmId};
use rand::Rng;

use crate::error::AllocationError;

/// A virtual network and the VMs currently attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEntry {
    /// Network identifier, equal to the owning VM's id.
    pub id: NetworkId,
    /// VMs using the network.
    pub members: BTreeSet<VmId>,
}

/// What happened to a network after a member left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRemoval {
    /// The last member left and the entry was reclaimed.
    NetworkDeleted(NetworkId),
    /// Other members remain.
    Remaining { network_id: NetworkId, members: usize },
}

/// Thread-safe table of virtual networks.
///
/// All member-set mutations go through one mutex, so an `add_member` can
/// never interleave with a `remove_member` on the same network.
#[derive(Debug, Default)]
pub struct NetworkAllocator {
    networks: Mutex<BTreeMap<NetworkId, NetworkEntry>>,
}

impl NetworkAllocator {
    /// Create an empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the network owned by `vm_id` with an empty member set.
    ///
    /// # Errors
    /// Returns [`AllocationError::AlreadyExists`] if the network was created
    /// before and not yet reclaimed.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn create_network(&self, vm_id: VmId) -> Result<NetworkId, AllocationError> {
        let network_id = NetworkId::from(vm_id);
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut networks = self.networks.lock().expect("network table lock poisoned");
        if networks.contains_key(&network_id) {
            return Err(AllocationError::AlreadyExists(network_id));
        }
        networks.insert(network_id, NetworkEntry { id: network_id, members: BTreeSet::new() });
        tracing::debug!(network_id = %network_id, "network created");
        Ok(network_id)
    }

    /// Draw an address inside `network_id`.
    ///
    /// # Errors
    /// Returns [`AllocationError::UnknownNetwork`] if the network does not exist.
    pub fn assign_ip(&self, network_id: NetworkId) -> Result<String, AllocationError> {
        if !self.contains(network_id) {
            return Err(AllocationError::UnknownNetwork(network_id));
        }
        let host = rand::rng().random_range(1..=254u8);
        Ok(format_ip(network_id, host))
    }

    /// Attach `vm_id` to `network_id`.
    ///
    /// # Errors
    /// Returns [`AllocationError::UnknownNetwork`] if the network does not exist.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn add_member(&self, network_id: NetworkId, vm_id: VmId) -> Result<(), AllocationError> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut networks = self.networks.lock().expect("network table lock poisoned");
        let entry = networks
            .get_mut(&network_id)
            .ok_or(AllocationError::UnknownNetwork(network_id))?;
        entry.members.insert(vm_id);
        Ok(())
    }

    /// Detach `vm_id` from `network_id`, reclaiming the network if it empties.
    ///
    /// # Errors
    /// Returns [`AllocationError::UnknownNetwork`] if the network does not
    /// exist, or [`AllocationError::NotAMember`] if `vm_id` is not attached.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn remove_member(
        &self,
        network_id: NetworkId,
        vm_id: VmId,
    ) -> Result<MemberRemoval, AllocationError> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut networks = self.networks.lock().expect("network table lock poisoned");
        Self::remove_locked(&mut networks, network_id, vm_id)
    }

    /// Detach `vm_id` from whichever network holds it.
    ///
    /// Returns `None` when the VM belongs to no network; that is not an error.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn delete_network_for_vm(&self, vm_id: VmId) -> Option<MemberRemoval> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut networks = self.networks.lock().expect("network table lock poisoned");
        let network_id = networks
            .values()
            .find(|entry| entry.members.contains(&vm_id))
            .map(|entry| entry.id)?;
        Self::remove_locked(&mut networks, network_id, vm_id).ok()
    }

    /// Drop a network regardless of its members.
    ///
    /// Used to roll back a half-finished start. Returns `true` if it existed.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    pub fn discard_network(&self, network_id: NetworkId) -> bool {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let removed = self
            .networks
            .lock()
            .expect("network table lock poisoned")
            .remove(&network_id)
            .is_some();
        if removed {
            tracing::debug!(network_id = %network_id, "network discarded");
        }
        removed
    }

    /// Return a copy of the entry for `network_id`, if any.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn get(&self, network_id: NetworkId) -> Option<NetworkEntry> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.networks
            .lock()
            .expect("network table lock poisoned")
            .get(&network_id)
            .cloned()
    }

    /// Return `true` if `network_id` currently exists.
    #[must_use]
    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.get(network_id).is_some()
    }

    /// Number of live networks.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.networks.lock().expect("network table lock poisoned").len()
    }

    /// Return `true` if no network exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_locked(
        networks: &mut BTreeMap<NetworkId, NetworkEntry>,
        network_id: NetworkId,
        vm_id: VmId,
    ) -> Result<MemberRemoval, AllocationError> {
        let entry = networks
            .get_mut(&network_id)
            .ok_or(AllocationError::UnknownNetwork(network_id))?;
        if !entry.members.remove(&vm_id) {
            return Err(AllocationError::NotAMember { network_id, vm_id });
        }
        if entry.members.is_empty() {
            networks.remove(&network_id);
            tracing::info!(network_id = %network_id, "network deleted because no VMs are left");
            return Ok(MemberRemoval::NetworkDeleted(network_id));
        }
        Ok(MemberRemoval::Remaining { network_id, members: entry.members.len() })
    }
}

/// Render the address for `host` inside `network_id`.
#[must_use]
pub fn format_ip(network_id: NetworkId, host: u8) -> String {
    format!("192.168.{network_id}.{host}")
}
