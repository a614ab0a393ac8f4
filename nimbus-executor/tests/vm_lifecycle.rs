//! End-to-end lifecycle tests against the real `nimbus-worker` binary.

use std::time::Duration;

use nimbus_core::{NetworkId, VmId, VmListing, VmSnapshot, VmStatus};
use nimbus_executor::{ProcessBackend, Termination, VmLifecycleManager, WorkerConfig};

fn manager() -> VmLifecycleManager<ProcessBackend> {
    let config = WorkerConfig::new(env!("CARGO_BIN_EXE_nimbus-worker"))
        .with_sample_interval(Duration::from_millis(100))
        .with_stop_timeout(Duration::from_secs(3));
    VmLifecycleManager::new(ProcessBackend::new(config))
}

async fn wait_for_metrics(
    mgr: &VmLifecycleManager<ProcessBackend>,
    vm_id: VmId,
) -> Option<VmSnapshot> {
    for _ in 0..100 {
        if let Ok(snap) = mgr.monitor(vm_id) {
            if snap.cpu.is_some() && snap.memory.is_some() {
                return Some(snap);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

#[tokio::test]
async fn worker_binary_publishes_metrics_until_stopped() {
    let mgr = manager();
    mgr.start(VmId(1)).await.expect("start failed");

    let snap = wait_for_metrics(&mgr, VmId(1)).await.expect("no metrics within 5s");
    assert_eq!(snap.status, VmStatus::Running);
    let cpu = snap.cpu.expect("cpu present");
    let memory = snap.memory.expect("memory present");
    assert!((0.0..=100.0).contains(&cpu), "cpu {cpu} out of range");
    assert!((0.0..=100.0).contains(&memory), "memory {memory} out of range");

    let outcome = mgr.stop(VmId(1)).await.expect("stop failed");
    assert_eq!(outcome.termination, Some(Termination::Graceful));

    // Nothing from the old worker may land after stop returned.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snap = mgr.monitor(VmId(1)).expect("record kept after stop");
    assert_eq!(snap.status, VmStatus::Stopped);
    assert_eq!((snap.cpu, snap.memory, snap.pid, snap.ip), (None, None, None, None));
    assert!(!mgr.networks().contains(NetworkId(1)));
}

#[tokio::test]
async fn delete_running_vm_terminates_worker_and_clears_state() {
    let mgr = manager();
    mgr.start(VmId(2)).await.expect("start failed");
    mgr.start(VmId(3)).await.expect("start failed");

    let outcome = mgr.delete(VmId(2)).await.expect("delete failed");
    assert_eq!(outcome.message, "VM 2 deleted!");
    assert!(mgr.monitor(VmId(2)).is_err());
    assert!(!mgr.networks().contains(NetworkId(2)));

    let ids: Vec<VmId> = mgr.list().snapshots().iter().map(|s| s.vm_id).collect();
    assert_eq!(ids, vec![VmId(3)]);

    assert_eq!(mgr.shutdown().await, 1);
    mgr.delete(VmId(3)).await.expect("delete failed");
    assert_eq!(mgr.list(), VmListing::Empty);
    assert!(mgr.networks().is_empty());
}
