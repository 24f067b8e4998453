mod support;

use std::sync::Arc;
use std::time::Duration;

use splice_orchestrator::splice::SpliceStatus;
use splice_orchestrator::splice::registry::OperationRegistry;

use support::fixtures::operation;

#[test]
fn set_get_update_remove() {
    let registry = OperationRegistry::new();
    assert!(registry.is_empty());
    assert!(registry.get("c1").is_none());

    assert!(registry.set(operation("c1", SpliceStatus::Executing)).is_none());
    let previous = registry
        .set(operation("c1", SpliceStatus::Confirming))
        .expect("replaced record");
    assert_eq!(previous.status, SpliceStatus::Executing);
    assert_eq!(registry.len(), 1);

    let confs = registry.update("c1", |op| {
        op.confirmations = 4;
        op.confirmations
    });
    assert_eq!(confs, Some(4));
    assert_eq!(registry.get("c1").map(|op| op.confirmations), Some(4));
    assert_eq!(registry.update("missing", |op| op.confirmations), None);

    let removed = registry.remove("c1").expect("removed record");
    assert_eq!(removed.channel_id, "c1");
    assert!(registry.remove("c1").is_none());
    assert!(registry.is_empty());
}

#[test]
fn remove_if_respects_predicate() {
    let registry = OperationRegistry::new();
    registry.set(operation("c1", SpliceStatus::Confirming));

    let failed = |op: &splice_orchestrator::splice::SpliceOperation| {
        op.status == SpliceStatus::Failed
    };
    assert!(registry.remove_if("c1", failed).is_none());
    assert!(registry.get("c1").is_some());

    registry.update("c1", |op| op.status = SpliceStatus::Failed);
    assert!(registry.remove_if("c1", failed).is_some());
    assert!(registry.get("c1").is_none());
}

#[test]
fn snapshot_is_sorted_and_detached() {
    let registry = OperationRegistry::new();
    for ch in ["c3", "c1", "c2"] {
        registry.set(operation(ch, SpliceStatus::Confirming));
    }

    let snap = registry.snapshot();
    let ids: Vec<_> = snap.iter().map(|op| op.channel_id.as_str()).collect();
    assert_eq!(ids, ["c1", "c2", "c3"]);

    registry.clear();
    assert!(registry.is_empty());
    assert_eq!(snap.len(), 3);
}

#[tokio::test]
async fn channel_locks_serialize_per_channel() {
    let registry = Arc::new(OperationRegistry::new());

    let held = registry.lock_channel("c1").await;

    // other channels are independent
    let other = tokio::time::timeout(Duration::from_millis(100), registry.lock_channel("c2")).await;
    assert!(other.is_ok());

    let waiter = tokio::spawn({
        let registry = registry.clone();
        async move {
            let _guard = registry.lock_channel("c1").await;
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(held);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter acquired lock")
        .expect("waiter task");
}

#[tokio::test]
async fn released_channels_drop_their_lock_entry() {
    let registry = OperationRegistry::new();

    let held = registry.lock_channel("c1").await;
    registry.release_channel("c1");
    assert_eq!(registry.tracked_locks(), 1);

    drop(held);
    registry.release_channel("c1");
    assert_eq!(registry.tracked_locks(), 0);

    // a fresh lock is handed out on the next call
    let _again = registry.lock_channel("c1").await;
    assert_eq!(registry.tracked_locks(), 1);
}
