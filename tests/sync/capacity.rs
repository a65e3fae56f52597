use financeflow_sync::{
    CacheSnapshot, CapacityEdge, CapacityGuard, Collection, RecordId, SyncConfig, SyncError,
    SyncErrorKind,
};
use tokio::sync::broadcast::error::TryRecvError;

use crate::common::*;

#[tokio::test]
async fn writes_are_refused_at_capacity_and_resume_once_cleared() {
    let seeded: Vec<_> = (1..=6)
        .map(|n| expense(&format!("a{n}"), ALICE, "Food"))
        .collect();
    let full = CapacityGuard::estimate(&CacheSnapshot {
        transactions: seeded.clone(),
        ..CacheSnapshot::default()
    });
    // Six records fill the ceiling exactly; three plus a new one stay under 90%.
    let h = Harness::with_config(SyncConfig {
        capacity_ceiling_bytes: full,
        ..fast_config()
    });
    for t in seeded {
        h.remote.seed(t);
    }
    let tab = h.tab();
    let mut edges = tab.coordinator.capacity_edges();

    tab.coordinator.sign_in(&alice()).await.unwrap();
    assert!(tab.coordinator.capacity().at_capacity);

    let err = tab
        .coordinator
        .create_record(expense("", ALICE, "Fuel"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::CapacityReached { .. }));
    assert_eq!(tab.errors()[0].kind, SyncErrorKind::Capacity);
    assert!(h.remote.inserted().is_empty());

    for id in ["a1", "a2", "a3"] {
        tab.coordinator
            .delete_record(Collection::Transactions, &RecordId::new(id))
            .await
            .unwrap();
    }
    assert!(!tab.coordinator.capacity().at_capacity);
    tab.coordinator
        .create_record(expense("", ALICE, "Fuel"))
        .await
        .unwrap();

    assert_eq!(edges.try_recv().unwrap(), CapacityEdge::Reached);
    assert_eq!(edges.try_recv().unwrap(), CapacityEdge::Cleared);
    assert!(matches!(edges.try_recv(), Err(TryRecvError::Empty)));
}
