//! Shared VM registry.
//!
//! The single map from VM id to record, read and written concurrently by
//! the lifecycle manager and by every worker's sample pump. Records keep
//! insertion order so listings are stable.

use std::sync::RwLock;

use indexmap::IndexMap;
use nimbus_core::{MetricsSample, VmId, VmSnapshot, VmStatus};

use crate::WorkerHandle;

/// Fixed-shape record for one VM.
#[derive(Debug, Clone)]
pub struct VmRecord {
    /// Registry key.
    pub id: VmId,
    /// Current lifecycle state.
    pub status: VmStatus,
    /// Worker handle; present iff running.
    pub worker: Option<WorkerHandle>,
    /// Latest CPU sample; `None` until the first sample after a start.
    pub cpu_percent: Option<f32>,
    /// Latest memory sample; `None` until the first sample after a start.
    pub mem_percent: Option<f32>,
    /// Assigned address; present iff running.
    pub ip: Option<String>,
}

impl VmRecord {
    /// A freshly started record with no samples yet.
    #[must_use]
    pub fn running(id: VmId, worker: WorkerHandle, ip: String) -> Self {
        Self {
            id,
            status: VmStatus::Running,
            worker: Some(worker),
            cpu_percent: None,
            mem_percent: None,
            ip: Some(ip),
        }
    }

    /// Switch to running with a new worker and address, clearing old samples.
    pub fn mark_running(&mut self, worker: WorkerHandle, ip: String) {
        *self = Self::running(self.id, worker, ip);
    }

    /// Switch to stopped, clearing worker, address and samples.
    pub fn mark_stopped(&mut self) {
        self.status = VmStatus::Stopped;
        self.worker = None;
        self.cpu_percent = None;
        self.mem_percent = None;
        self.ip = None;
    }

    /// `true` if worker and address are present exactly when running.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            VmStatus::Running => self.worker.is_some() && self.ip.is_some(),
            VmStatus::Stopped => {
                self.worker.is_none()
                    && self.ip.is_none()
                    && self.cpu_percent.is_none()
                    && self.mem_percent.is_none()
            }
        }
    }

    /// Public view of the record.
    #[must_use]
    pub fn snapshot(&self) -> VmSnapshot {
        VmSnapshot {
            vm_id: self.id,
            status: self.status,
            pid: self.worker.as_ref().map(WorkerHandle::pid),
            cpu: self.cpu_percent,
            memory: self.mem_percent,
            ip: self.ip.clone(),
        }
    }
}

/// Thread-safe, insertion-ordered VM registry.
///
/// Every method takes the lock once, so each call is atomic with respect to
/// every other call.
#[derive(Debug, Default)]
pub struct VmRegistry {
    records: RwLock<IndexMap<VmId, VmRecord>>,
}

impl VmRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the record for `id`.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn get(&self, id: VmId) -> Option<VmRecord> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.records
            .read()
            .expect("vm registry read lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Create or fully replace the record keyed by `record.id`.
    ///
    /// A replaced record keeps its position in the listing order.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned, and in debug builds if
    /// the record violates the running/stopped field invariant.
    pub fn put(&self, record: VmRecord) {
        debug_assert!(record.is_consistent(), "inconsistent VM record: {record:?}");
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.records
            .write()
            .expect("vm registry write lock poisoned")
            .insert(record.id, record);
    }

    /// Apply `mutator` to the record for `id` only if its status is `expected`.
    ///
    /// Check and update happen under one write lock. Returns `true` if the
    /// update was applied.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned, and in debug builds if
    /// `mutator` leaves the record inconsistent.
    pub fn compare_and_update_status<F>(&self, id: VmId, expected: VmStatus, mutator: F) -> bool
    where
        F: FnOnce(&mut VmRecord),
    {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut records = self.records.write().expect("vm registry write lock poisoned");
        match records.get_mut(&id) {
            Some(record) if record.status == expected => {
                mutator(record);
                debug_assert_eq!(record.id, id, "mutator must not re-key a record");
                debug_assert!(record.is_consistent(), "inconsistent VM record: {record:?}");
                true
            }
            _ => false,
        }
    }

    /// Remove the record for `id`, returning it.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub fn delete(&self, id: VmId) -> Option<VmRecord> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.records
            .write()
            .expect("vm registry write lock poisoned")
            .shift_remove(&id)
    }

    /// Copy of every record in insertion order.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> Vec<VmRecord> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.records
            .read()
            .expect("vm registry read lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Store a worker sample for `id`.
    ///
    /// No-op returning `false` when the record is gone or no longer running,
    /// which happens while a worker drains after a stop request.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    pub fn update_metrics(&self, id: VmId, sample: MetricsSample) -> bool {
        self.compare_and_update_status(id, VmStatus::Running, |record| {
            record.cpu_percent = Some(sample.cpu_percent);
            record.mem_percent = Some(sample.mem_percent);
        })
    }

    /// Number of records.
    ///
    /// # Panics
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        self.records.read().expect("vm registry read lock poisoned").len()
    }

    /// Return `true` if the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
