//! VM lifecycle state machine.
//!
//! Drives the network allocator, the registry and the worker backend to
//! implement start, stop, delete, monitor and list. Per VM id the states are
//! absent, running and stopped; start and stop are idempotent and report a
//! conflict instead of repeating side effects.
//!
//! Concurrency: every mutating operation holds a per-VM async lock for its
//! whole duration, so two callers can never both perform the same
//! transition. Record updates additionally go through the registry's
//! compare-and-update primitive, which linearizes them against the sample
//! pumps. Operations on different ids never wait for each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nimbus_core::{NetworkId, VmId, VmListing, VmSnapshot, VmStatus};
use serde::Serialize;

use crate::network::MemberRemoval;
use crate::{
    ExecutorError, NetworkAllocator, Termination, VmRecord, VmRegistry, WorkerBackend,
    WorkerHandle,
};

/// Successful result of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpOutcome {
    /// The VM the operation targeted.
    pub vm_id: VmId,
    /// Human-readable result, e.g. `"VM 3 started!"`.
    pub message: String,
    /// How the worker went away, for stop and delete of a running VM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,
}

/// Orchestrates VM lifecycle over a [`WorkerBackend`].
///
/// Owns the registry and the network table; no state is process-global.
/// All operations are safe to call concurrently.
pub struct VmLifecycleManager<B: WorkerBackend> {
    backend: B,
    registry: Arc<VmRegistry>,
    networks: NetworkAllocator,
    op_locks: OpLockTable,
}

type OpLockTable = Mutex<HashMap<VmId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds the per-VM operation lock; removes the table entry on drop once no
/// other caller holds or waits for it.
struct OpLockGuard<'a> {
    vm_id: VmId,
    table: &'a OpLockTable,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for OpLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Poisoning only means an entry may linger; never panic in drop.
        let Ok(mut locks) = self.table.lock() else {
            return;
        };
        if locks.get(&self.vm_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.vm_id);
        }
    }
}

impl<B: WorkerBackend> std::fmt::Debug for VmLifecycleManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmLifecycleManager")
            .field("registry", &self.registry)
            .field("networks", &self.networks)
            .finish_non_exhaustive()
    }
}

impl<B: WorkerBackend> VmLifecycleManager<B> {
    /// Create a manager with an empty registry and network table.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registry: Arc::new(VmRegistry::new()),
            networks: NetworkAllocator::new(),
            op_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<VmRegistry> {
        &self.registry
    }

    /// The network table.
    #[must_use]
    pub fn networks(&self) -> &NetworkAllocator {
        &self.networks
    }

    /// The worker backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Start `vm_id`, creating its record on first use.
    ///
    /// Network and address are allocated before the worker is spawned; the
    /// record becomes visible only once the worker handle exists.
    ///
    /// # Errors
    /// - [`ExecutorError::AlreadyRunning`] if the VM is running (no side effects).
    /// - [`ExecutorError::Allocation`] if the network table is out of order.
    /// - [`ExecutorError::SpawnFailed`] if the worker cannot start; the
    ///   network is rolled back so the call can be retried.
    pub async fn start(&self, vm_id: VmId) -> Result<OpOutcome, ExecutorError> {
        let _guard = self.lock_vm(vm_id).await;

        let existing = self.registry.get(vm_id).map(|record| record.status);
        if existing == Some(VmStatus::Running) {
            tracing::debug!(vm_id = %vm_id, "start ignored, already running");
            return Err(ExecutorError::AlreadyRunning(vm_id));
        }

        let network_id = self.networks.create_network(vm_id)?;
        let (ip, worker) = match self.provision(vm_id, network_id).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                self.networks.discard_network(network_id);
                tracing::warn!(vm_id = %vm_id, error = %e, "start failed, network rolled back");
                return Err(e);
            }
        };

        let pid = worker.pid();
        let stored = match existing {
            None => {
                self.registry.put(VmRecord::running(vm_id, worker.clone(), ip.clone()));
                true
            }
            Some(_) => {
                let (worker, ip) = (worker.clone(), ip.clone());
                self.registry.compare_and_update_status(vm_id, VmStatus::Stopped, |record| {
                    record.mark_running(worker, ip);
                })
            }
        };

        if !stored {
            // Only reachable if the record changed outside the operation lock.
            tracing::warn!(vm_id = %vm_id, "record changed during start, rolling back");
            self.networks.discard_network(network_id);
            self.backend.terminate(vm_id, &worker).await?;
            return Err(ExecutorError::AlreadyRunning(vm_id));
        }

        tracing::info!(vm_id = %vm_id, pid, ip = %ip, "VM started");

        Ok(OpOutcome { vm_id, message: format!("VM {vm_id} started!"), termination: None })
    }

    /// Stop a running VM, leaving a stopped record behind.
    ///
    /// Blocks until the worker has exited, bounded by the backend's stop
    /// timeout plus a forced kill.
    ///
    /// # Errors
    /// - [`ExecutorError::VmNotFound`] if there is no record.
    /// - [`ExecutorError::AlreadyStopped`] if the VM is stopped (no side effects).
    /// - [`ExecutorError::Io`] if the worker cannot be signalled or killed.
    pub async fn stop(&self, vm_id: VmId) -> Result<OpOutcome, ExecutorError> {
        let _guard = self.lock_vm(vm_id).await;

        let record = self.registry.get(vm_id).ok_or(ExecutorError::VmNotFound(vm_id))?;
        if record.status == VmStatus::Stopped {
            tracing::debug!(vm_id = %vm_id, "stop ignored, already stopped");
            return Err(ExecutorError::AlreadyStopped(vm_id));
        }

        let termination = self.terminate_worker(vm_id, record.worker.as_ref()).await?;
        self.registry
            .compare_and_update_status(vm_id, VmStatus::Running, VmRecord::mark_stopped);
        self.release_network(vm_id);

        tracing::info!(vm_id = %vm_id, ?termination, "VM stopped");

        Ok(OpOutcome { vm_id, message: format!("VM {vm_id} stopped!"), termination })
    }

    /// Remove a VM entirely, stopping its worker first if it is running.
    ///
    /// # Errors
    /// - [`ExecutorError::VmNotFound`] if there is no record.
    /// - [`ExecutorError::Io`] if the worker cannot be signalled or killed.
    pub async fn delete(&self, vm_id: VmId) -> Result<OpOutcome, ExecutorError> {
        let _guard = self.lock_vm(vm_id).await;

        let record = self.registry.get(vm_id).ok_or(ExecutorError::VmNotFound(vm_id))?;
        let termination = match record.status {
            VmStatus::Running => self.terminate_worker(vm_id, record.worker.as_ref()).await?,
            VmStatus::Stopped => None,
        };
        self.release_network(vm_id);
        self.registry.delete(vm_id);

        tracing::info!(vm_id = %vm_id, ?termination, "VM deleted");

        Ok(OpOutcome { vm_id, message: format!("VM {vm_id} deleted!"), termination })
    }

    /// Current view of one VM. Never waits on workers.
    ///
    /// # Errors
    /// Returns [`ExecutorError::VmNotFound`] if there is no record.
    pub fn monitor(&self, vm_id: VmId) -> Result<VmSnapshot, ExecutorError> {
        self.registry
            .get(vm_id)
            .map(|record| record.snapshot())
            .ok_or(ExecutorError::VmNotFound(vm_id))
    }

    /// Every VM in creation order, or [`VmListing::Empty`].
    #[must_use]
    pub fn list(&self) -> VmListing {
        VmListing::from_snapshots(self.registry.snapshot().iter().map(VmRecord::snapshot).collect())
    }

    /// Stop every running VM. Returns how many were stopped.
    ///
    /// Failures are logged and do not abort the sweep.
    pub async fn shutdown(&self) -> usize {
        let running: Vec<VmId> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|record| record.status == VmStatus::Running)
            .map(|record| record.id)
            .collect();

        if running.is_empty() {
            tracing::info!("no running VMs to stop");
            return 0;
        }
        tracing::info!(count = running.len(), "stopping running VMs");

        let mut stopped = 0;
        for vm_id in running {
            match self.stop(vm_id).await {
                Ok(_) => stopped += 1,
                Err(ExecutorError::AlreadyStopped(_) | ExecutorError::VmNotFound(_)) => {}
                Err(e) => tracing::error!(vm_id = %vm_id, error = %e, "failed to stop VM"),
            }
        }
        stopped
    }

    async fn provision(
        &self,
        vm_id: VmId,
        network_id: NetworkId,
    ) -> Result<(String, WorkerHandle), ExecutorError> {
        let ip = self.networks.assign_ip(network_id)?;
        self.networks.add_member(network_id, vm_id)?;
        let worker = self.backend.spawn(vm_id, Arc::clone(&self.registry)).await?;
        Ok((ip, worker))
    }

    async fn terminate_worker(
        &self,
        vm_id: VmId,
        worker: Option<&WorkerHandle>,
    ) -> Result<Option<Termination>, ExecutorError> {
        let Some(worker) = worker else {
            return Ok(None);
        };
        let termination = self.backend.terminate(vm_id, worker).await?;
        if let Some(warning) = termination.warning() {
            tracing::warn!(vm_id = %vm_id, pid = worker.pid(), %warning, "worker was force-killed");
        }
        Ok(Some(termination))
    }

    fn release_network(&self, vm_id: VmId) {
        match self.networks.delete_network_for_vm(vm_id) {
            Some(MemberRemoval::NetworkDeleted(network_id)) => {
                tracing::debug!(vm_id = %vm_id, network_id = %network_id, "network released");
            }
            Some(MemberRemoval::Remaining { network_id, members }) => {
                tracing::debug!(
                    vm_id = %vm_id,
                    network_id = %network_id,
                    members,
                    "left shared network"
                );
            }
            None => tracing::debug!(vm_id = %vm_id, "VM held no network"),
        }
    }

    async fn lock_vm(&self, vm_id: VmId) -> OpLockGuard<'_> {
        let lock = {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut locks = self.op_locks.lock().expect("operation lock table poisoned");
            Arc::clone(locks.entry(vm_id).or_default())
        };
        let guard = lock.lock_owned().await;
        OpLockGuard { vm_id, table: &self.op_locks, guard: Some(guard) }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use nimbus_core::ErrorKind;

    use super::*;
    use crate::{ProcessBackend, WorkerConfig};

    const SAMPLE_SCRIPT: &str =
        "while true; do echo '{\"cpu_percent\":12.5,\"mem_percent\":40.0}'; sleep 0.05; done";
    const STUBBORN_SCRIPT: &str = "trap '' TERM; while true; do sleep 0.05; done";

    /// Delegates to a process backend and counts spawns and terminations.
    struct CountingBackend {
        inner: ProcessBackend,
        spawns: AtomicUsize,
        terminates: AtomicUsize,
    }

    impl CountingBackend {
        fn new(script: &str, stop_timeout: Duration) -> Self {
            Self {
                inner: ProcessBackend::new(
                    WorkerConfig::new("sh")
                        .with_args(["-c", script])
                        .with_stop_timeout(stop_timeout),
                ),
                spawns: AtomicUsize::new(0),
                terminates: AtomicUsize::new(0),
            }
        }

        fn spawns(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }

        fn terminates(&self) -> usize {
            self.terminates.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkerBackend for CountingBackend {
        async fn spawn(
            &self,
            vm_id: VmId,
            registry: Arc<VmRegistry>,
        ) -> Result<WorkerHandle, ExecutorError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent starts.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.spawn(vm_id, registry).await
        }

        async fn terminate(
            &self,
            vm_id: VmId,
            handle: &WorkerHandle,
        ) -> Result<Termination, ExecutorError> {
            self.terminates.fetch_add(1, Ordering::SeqCst);
            self.inner.terminate(vm_id, handle).await
        }
    }

    /// Once armed, flips a stopped record to running behind the manager's
    /// back during spawn and refuses to terminate.
    struct HijackingBackend {
        inner: ProcessBackend,
        armed: AtomicBool,
    }

    #[async_trait]
    impl WorkerBackend for HijackingBackend {
        async fn spawn(
            &self,
            vm_id: VmId,
            registry: Arc<VmRegistry>,
        ) -> Result<WorkerHandle, ExecutorError> {
            let handle = self.inner.spawn(vm_id, Arc::clone(&registry)).await?;
            if self.armed.load(Ordering::SeqCst) {
                let other = handle.clone();
                registry.compare_and_update_status(vm_id, VmStatus::Stopped, |record| {
                    record.mark_running(other, format!("192.168.{vm_id}.1"));
                });
            }
            Ok(handle)
        }

        async fn terminate(
            &self,
            vm_id: VmId,
            handle: &WorkerHandle,
        ) -> Result<Termination, ExecutorError> {
            if self.armed.load(Ordering::SeqCst) {
                return Err(ExecutorError::Io(std::io::Error::other("signal refused")));
            }
            self.inner.terminate(vm_id, handle).await
        }
    }

    struct AlwaysFailBackend;

    #[async_trait]
    impl WorkerBackend for AlwaysFailBackend {
        async fn spawn(
            &self,
            _vm_id: VmId,
            _registry: Arc<VmRegistry>,
        ) -> Result<WorkerHandle, ExecutorError> {
            Err(ExecutorError::SpawnFailed("mock always fails".to_owned()))
        }

        async fn terminate(
            &self,
            _vm_id: VmId,
            _handle: &WorkerHandle,
        ) -> Result<Termination, ExecutorError> {
            Ok(Termination::Graceful)
        }
    }

    fn manager() -> VmLifecycleManager<CountingBackend> {
        VmLifecycleManager::new(CountingBackend::new(SAMPLE_SCRIPT, Duration::from_secs(2)))
    }

    fn assert_consistent<B: WorkerBackend>(mgr: &VmLifecycleManager<B>) {
        for record in mgr.registry().snapshot() {
            assert!(record.is_consistent(), "inconsistent record {record:?}");
        }
    }

    #[tokio::test]
    async fn start_then_monitor_reports_running_with_ip() {
        let mgr = manager();
        let outcome = match mgr.start(VmId(3)).await {
            Ok(o) => o,
            Err(e) => panic!("start failed: {e}"),
        };
        assert_eq!(outcome.message, "VM 3 started!");

        let snap = match mgr.monitor(VmId(3)) {
            Ok(s) => s,
            Err(e) => panic!("monitor failed: {e}"),
        };
        assert_eq!(snap.status, VmStatus::Running);
        assert!(snap.pid.is_some(), "running VM must expose a worker pid");
        let ip = snap.ip.unwrap_or_default();
        assert!(ip.starts_with("192.168.3."), "unexpected ip {ip}");
        let network = mgr.networks().get(NetworkId(3));
        assert!(network.is_some_and(|n| n.members.contains(&VmId(3))));
        assert_consistent(&mgr);

        assert!(mgr.delete(VmId(3)).await.is_ok());
    }

    #[tokio::test]
    async fn metrics_arrive_after_one_interval() {
        let mgr = manager();
        assert!(mgr.start(VmId(4)).await.is_ok());

        let mut snap = None;
        for _ in 0..100 {
            let current = mgr.monitor(VmId(4)).ok();
            if current.as_ref().is_some_and(|s| s.cpu.is_some() && s.memory.is_some()) {
                snap = current;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let snap = snap.unwrap_or_else(|| panic!("no metrics published for VM 4"));
        assert_eq!(snap.cpu, Some(12.5));
        assert_eq!(snap.memory, Some(40.0));

        assert!(mgr.delete(VmId(4)).await.is_ok());
    }

    #[tokio::test]
    async fn second_start_reports_already_running_without_spawning() {
        let mgr = manager();
        assert!(mgr.start(VmId(5)).await.is_ok());
        let second = mgr.start(VmId(5)).await;
        assert!(matches!(second, Err(ExecutorError::AlreadyRunning(VmId(5)))));
        assert_eq!(second.map_err(|e| e.kind()).err(), Some(ErrorKind::Conflict));
        assert_eq!(mgr.backend().spawns(), 1, "idempotent start must not spawn twice");

        assert!(mgr.delete(VmId(5)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_exactly_one_worker() {
        let mgr = Arc::new(manager());
        let a = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.start(VmId(6)).await }
        });
        let b = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.start(VmId(6)).await }
        });
        let results = [a.await, b.await].map(|joined| match joined {
            Ok(r) => r,
            Err(e) => panic!("start task panicked: {e}"),
        });

        let started = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ExecutorError::AlreadyRunning(_))))
            .count();
        assert_eq!((started, conflicts), (1, 1), "exactly one start must win");
        assert_eq!(mgr.backend().spawns(), 1);
        assert_eq!(mgr.networks().len(), 1);
        assert_consistent(&mgr);

        assert!(mgr.delete(VmId(6)).await.is_ok());
    }

    #[tokio::test]
    async fn stop_clears_fields_and_reclaims_network() {
        let mgr = manager();
        assert!(mgr.start(VmId(7)).await.is_ok());

        let outcome = match mgr.stop(VmId(7)).await {
            Ok(o) => o,
            Err(e) => panic!("stop failed: {e}"),
        };
        assert_eq!(outcome.message, "VM 7 stopped!");
        assert_eq!(outcome.termination, Some(Termination::Graceful));

        let snap = match mgr.monitor(VmId(7)) {
            Ok(s) => s,
            Err(e) => panic!("monitor failed: {e}"),
        };
        assert_eq!(snap.status, VmStatus::Stopped);
        assert_eq!((snap.pid, snap.ip, snap.cpu, snap.memory), (None, None, None, None));
        assert!(!mgr.networks().contains(NetworkId(7)), "network must be gone after stop");

        let again = mgr.stop(VmId(7)).await;
        assert!(matches!(again, Err(ExecutorError::AlreadyStopped(VmId(7)))));
        assert_consistent(&mgr);
    }

    #[tokio::test]
    async fn restart_after_stop_spawns_new_worker() {
        let mgr = manager();
        assert!(mgr.start(VmId(8)).await.is_ok());
        let first_pid = mgr.monitor(VmId(8)).ok().and_then(|s| s.pid);
        assert!(mgr.stop(VmId(8)).await.is_ok());

        assert!(mgr.start(VmId(8)).await.is_ok(), "stopped VM must be restartable");
        let snap = match mgr.monitor(VmId(8)) {
            Ok(s) => s,
            Err(e) => panic!("monitor failed: {e}"),
        };
        assert_eq!(snap.status, VmStatus::Running);
        assert_ne!(snap.pid, first_pid, "restart must use a fresh worker");
        assert!(mgr.networks().contains(NetworkId(8)));
        assert_eq!(mgr.backend().spawns(), 2);

        assert!(mgr.delete(VmId(8)).await.is_ok());
    }

    #[tokio::test]
    async fn delete_removes_record_and_network() {
        let mgr = manager();
        assert!(mgr.start(VmId(9)).await.is_ok());

        let outcome = match mgr.delete(VmId(9)).await {
            Ok(o) => o,
            Err(e) => panic!("delete failed: {e}"),
        };
        assert_eq!(outcome.message, "VM 9 deleted!");
        assert!(matches!(mgr.monitor(VmId(9)), Err(ExecutorError::VmNotFound(VmId(9)))));
        assert!(!mgr.networks().contains(NetworkId(9)));
        assert_eq!(mgr.list(), VmListing::Empty);
    }

    #[tokio::test]
    async fn delete_stopped_vm_leaves_no_tombstone() {
        let mgr = manager();
        assert!(mgr.start(VmId(10)).await.is_ok());
        assert!(mgr.stop(VmId(10)).await.is_ok());

        let outcome = mgr.delete(VmId(10)).await;
        assert!(matches!(outcome, Ok(OpOutcome { termination: None, .. })));
        assert!(mgr.registry().is_empty());
    }

    #[tokio::test]
    async fn operations_on_absent_vm_report_not_found() {
        let mgr = manager();
        assert!(matches!(mgr.stop(VmId(11)).await, Err(ExecutorError::VmNotFound(_))));
        assert!(matches!(mgr.delete(VmId(11)).await, Err(ExecutorError::VmNotFound(_))));
        assert!(matches!(mgr.monitor(VmId(11)), Err(ExecutorError::VmNotFound(_))));
        assert_eq!(mgr.backend().spawns(), 0);
    }

    #[tokio::test]
    async fn list_empty_registry_returns_marker() {
        let mgr = manager();
        assert_eq!(mgr.list(), VmListing::Empty);
    }

    #[tokio::test]
    async fn list_reports_vms_in_creation_order() {
        let mgr = manager();
        for id in [13, 12] {
            assert!(mgr.start(VmId(id)).await.is_ok());
        }
        assert!(mgr.stop(VmId(13)).await.is_ok());

        let listing = mgr.list();
        let view: Vec<(u32, VmStatus)> =
            listing.snapshots().iter().map(|s| (s.vm_id.get(), s.status)).collect();
        assert_eq!(view, vec![(13, VmStatus::Stopped), (12, VmStatus::Running)]);

        assert_eq!(mgr.shutdown().await, 1);
    }

    #[tokio::test]
    async fn stubborn_worker_stop_escalates_but_succeeds() {
        let mgr = VmLifecycleManager::new(CountingBackend::new(
            STUBBORN_SCRIPT,
            Duration::from_millis(200),
        ));
        assert!(mgr.start(VmId(14)).await.is_ok());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = match mgr.stop(VmId(14)).await {
            Ok(o) => o,
            Err(e) => panic!("stop must succeed after escalation: {e}"),
        };
        assert_eq!(outcome.termination, Some(Termination::ForceKilled));
        assert_eq!(mgr.monitor(VmId(14)).map(|s| s.status).ok(), Some(VmStatus::Stopped));
        assert!(!mgr.networks().contains(NetworkId(14)));
    }

    #[tokio::test]
    async fn spawn_failure_rolls_back_network() {
        let mgr = VmLifecycleManager::new(AlwaysFailBackend);
        let result = mgr.start(VmId(15)).await;
        assert!(matches!(result, Err(ExecutorError::SpawnFailed(_))));
        assert!(mgr.networks().is_empty(), "failed start must not leak a network");
        assert!(mgr.registry().is_empty(), "failed start must not publish a record");

        let retry = mgr.start(VmId(15)).await;
        assert!(
            matches!(retry, Err(ExecutorError::SpawnFailed(_))),
            "retry must reach the backend again, not trip over a stale network"
        );
    }

    #[tokio::test]
    async fn shutdown_stops_every_running_vm() {
        let mgr = manager();
        for id in [20, 21, 22] {
            assert!(mgr.start(VmId(id)).await.is_ok());
        }
        assert!(mgr.stop(VmId(21)).await.is_ok());

        assert_eq!(mgr.shutdown().await, 2);
        assert!(mgr
            .list()
            .snapshots()
            .iter()
            .all(|s| s.status == VmStatus::Stopped));
        assert!(mgr.networks().is_empty());
    }

    #[tokio::test]
    async fn concurrent_stops_terminate_once() {
        let mgr = Arc::new(manager());
        assert!(mgr.start(VmId(23)).await.is_ok());

        let a = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.stop(VmId(23)).await }
        });
        let b = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.stop(VmId(23)).await }
        });
        let results = [a.await, b.await].map(|joined| match joined {
            Ok(r) => r,
            Err(e) => panic!("stop task panicked: {e}"),
        });

        let stopped = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ExecutorError::AlreadyStopped(VmId(23)))))
            .count();
        assert_eq!((stopped, conflicts), (1, 1), "exactly one stop must win");
        assert_eq!(mgr.backend().terminates(), 1, "worker must be terminated once");
        assert_eq!(mgr.monitor(VmId(23)).map(|s| s.status).ok(), Some(VmStatus::Stopped));
        assert!(!mgr.networks().contains(NetworkId(23)));
        assert_consistent(&mgr);
    }

    #[tokio::test]
    async fn racing_start_and_stop_leave_consistent_state() {
        let mgr = Arc::new(manager());
        let start = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.start(VmId(24)).await }
        });
        let stop = tokio::spawn({
            let mgr = Arc::clone(&mgr);
            async move { mgr.stop(VmId(24)).await }
        });
        let (started, stopped) = match (start.await, stop.await) {
            (Ok(a), Ok(b)) => (a, b),
            _ => panic!("lifecycle task panicked"),
        };
        assert!(started.is_ok(), "start must succeed regardless of ordering");
        assert!(
            matches!(stopped, Ok(_) | Err(ExecutorError::VmNotFound(_))),
            "stop either wins after start or finds nothing: {stopped:?}"
        );

        assert_consistent(&mgr);
        let running = mgr.monitor(VmId(24)).map(|s| s.status).ok() == Some(VmStatus::Running);
        assert_eq!(running, mgr.networks().contains(NetworkId(24)), "network tracks running state");
        assert_eq!(mgr.backend().terminates(), usize::from(stopped.is_ok()));

        assert!(mgr.delete(VmId(24)).await.is_ok());
    }

    #[tokio::test]
    async fn operation_locks_are_released_after_use() {
        let mgr = manager();
        for id in 0..10_000 {
            assert!(matches!(mgr.stop(VmId(id)).await, Err(ExecutorError::VmNotFound(_))));
        }
        assert!(mgr.start(VmId(25)).await.is_ok());
        assert!(mgr.delete(VmId(25)).await.is_ok());

        let locks = match mgr.op_locks.lock() {
            Ok(l) => l.len(),
            Err(e) => panic!("lock table poisoned: {e}"),
        };
        assert_eq!(locks, 0, "idle VM ids must not keep lock entries");
    }

    #[tokio::test]
    async fn failed_rollback_still_releases_network() {
        let mgr = VmLifecycleManager::new(HijackingBackend {
            inner: ProcessBackend::new(WorkerConfig::new("sh").with_args(["-c", SAMPLE_SCRIPT])),
            armed: AtomicBool::new(false),
        });
        assert!(mgr.start(VmId(26)).await.is_ok());
        assert!(mgr.stop(VmId(26)).await.is_ok());

        mgr.backend().armed.store(true, Ordering::SeqCst);
        let result = mgr.start(VmId(26)).await;
        assert!(matches!(result, Err(ExecutorError::Io(_))), "terminate error must surface");
        assert!(
            !mgr.networks().contains(NetworkId(26)),
            "network must be discarded even when terminate fails"
        );
    }
}
