use std::time::Duration;

use chrono::{TimeZone, Utc};
use financeflow_sync::{
    remote::RemoteOp, Account, CalendarDate, Collection, EntryType, LoadOutcome, Record,
    RecordId, RemoteError, SessionState, SyncError, SyncErrorKind, SyncPhase, Transaction,
};

use crate::common::*;

fn draft(category: &str, amount: &str) -> Transaction {
    Transaction::new(
        CalendarDate::parse("2025-03-01").unwrap(),
        amount.parse().unwrap(),
        EntryType::Expense,
        Account::Checking,
        category,
    )
}

async fn signed_in_with(h: &Harness, seeded: &[&str]) -> Tab {
    for id in seeded {
        h.remote.seed(expense(id, ALICE, "Food"));
    }
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    tab
}

/// Wait until a call of `op` has reached the backend and is held by latency.
async fn held_in_flight(h: &Harness, op: RemoteOp) {
    while h.remote.in_flight(op) == 0 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// create
// ============================================================================

#[tokio::test]
async fn create_inserts_once_for_signed_in_owner_and_rereads() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &[]).await;
    let selects_before = h.remote.select_calls(Collection::Transactions);

    let stored = tab.coordinator.create_record(draft("Food", "50")).await.unwrap();

    let inserted = h.remote.inserted();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].owner_id(), &owner(ALICE));
    assert!(!inserted[0].id().is_empty());
    assert_eq!(h.remote.select_calls(Collection::Transactions), selects_before + 1);

    assert_eq!(stored.owner_id(), &owner(ALICE));
    assert!(stored.created_at().is_some());
    let cached = tab.coordinator.cache().transactions();
    assert_eq!(cached.len(), 1);
    assert_eq!(&cached[0].id, stored.id());
}

#[tokio::test]
async fn create_ignores_caller_supplied_owner() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &[]).await;

    let mut forged = draft("Food", "5");
    forged.owner_id = owner(BOB);
    tab.coordinator.create_record(forged).await.unwrap();

    assert_eq!(h.remote.inserted()[0].owner_id(), &owner(ALICE));
    assert!(h.remote.rows(Collection::Transactions, &owner(BOB)).is_empty());
}

#[tokio::test]
async fn invalid_record_is_rejected_before_any_remote_call() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &[]).await;

    let err = tab
        .coordinator
        .create_record(draft("Food", "-3"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(h.remote.calls(RemoteOp::Insert), 0);
    assert!(tab.coordinator.cache().is_empty());
    let errors = tab.errors();
    assert_eq!(errors[0].phase, SyncPhase::Create);
    assert_eq!(errors[0].kind, SyncErrorKind::Permanent);
}

#[tokio::test(start_paused = true)]
async fn create_gives_up_after_retries_without_touching_cache() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1"]).await;
    h.remote
        .fail_times(RemoteOp::Insert, RemoteError::network("offline"), 3);

    let err = tab
        .coordinator
        .create_record(draft("Food", "5"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(h.remote.calls(RemoteOp::Insert), 3);
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a1"]);
    assert_eq!(tab.errors()[0].kind, SyncErrorKind::Transient);
}

#[tokio::test(start_paused = true)]
async fn concurrent_creates_in_one_collection_both_land() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &[]).await;
    h.remote.set_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(
        tab.coordinator.create_record(draft("Food", "1")),
        tab.coordinator.create_record(draft("Fuel", "2")),
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(h.remote.peak_in_flight(RemoteOp::Insert), 1);
    assert_eq!(h.remote.calls(RemoteOp::Insert), 2);
    assert_eq!(tab.coordinator.cache().transactions().len(), 2);
    assert_eq!(h.remote.rows(Collection::Transactions, &owner(ALICE)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn sign_out_during_create_abandons_the_insert() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &[]).await;
    h.remote.set_latency(Duration::from_millis(20));

    let (created, _) = tokio::join!(
        tab.coordinator.create_record(draft("Food", "1")),
        async {
            held_in_flight(&h, RemoteOp::Insert).await;
            tab.coordinator.sign_out();
        },
    );

    assert!(matches!(created, Err(SyncError::Superseded)));
    assert_eq!(h.remote.in_flight(RemoteOp::Insert), 0);
    assert!(h.remote.inserted().is_empty());
    assert!(h
        .remote
        .rows(Collection::Transactions, &owner(ALICE))
        .is_empty());
    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert!(tab.coordinator.cache().is_empty());
    assert!(h.mirror.is_empty());
    assert!(tab.errors().is_empty());
}

#[tokio::test]
async fn unauthorized_write_ends_the_session() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1"]).await;
    h.remote.expire_session();

    let err = tab
        .coordinator
        .create_record(draft("Food", "5"))
        .await
        .unwrap_err();

    assert!(err.requires_sign_in());
    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert!(tab.coordinator.cache().is_empty());
    assert_eq!(tab.errors()[0].message, "Sign-in required.");
}

// ============================================================================
// delete
// ============================================================================

#[tokio::test]
async fn delete_removes_from_cache_and_backend() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1", "a2"]).await;

    tab.coordinator
        .delete_record(Collection::Transactions, &RecordId::new("a1"))
        .await
        .unwrap();

    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a2"]);
    assert_eq!(h.remote.rows(Collection::Transactions, &owner(ALICE)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_delete_restores_record_at_its_position() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1", "a2", "a3"]).await;
    h.remote
        .fail_times(RemoteOp::Delete, RemoteError::network("offline"), 3);

    let err = tab
        .coordinator
        .delete_record(Collection::Transactions, &RecordId::new("a2"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(
        ids(&tab.coordinator.cache().transactions()),
        vec!["a1", "a2", "a3"]
    );
    let errors = tab.errors();
    assert_eq!(errors[0].phase, SyncPhase::Delete);
    assert_eq!(errors[0].id, Some(RecordId::new("a2")));
}

#[tokio::test(start_paused = true)]
async fn identity_change_during_delete_discards_it() {
    let h = Harness::new();
    h.remote.seed(expense("b1", BOB, "Rent"));
    let tab = signed_in_with(&h, &["a1"]).await;
    h.remote.set_latency(Duration::from_millis(20));
    h.remote
        .fail_times(RemoteOp::Delete, RemoteError::network("offline"), 3);

    let a1 = RecordId::new("a1");
    let (deleted, switched) = tokio::join!(
        tab.coordinator
            .delete_record(Collection::Transactions, &a1),
        async {
            held_in_flight(&h, RemoteOp::Delete).await;
            tab.coordinator.sign_in(&bob()).await
        },
    );

    assert!(matches!(deleted, Err(SyncError::Superseded)));
    assert_eq!(switched.unwrap(), LoadOutcome::Loaded);
    assert_eq!(tab.coordinator.active_owner(), Some(owner(BOB)));
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["b1"]);
    assert_eq!(h.remote.calls(RemoteOp::Delete), 1);
    assert_eq!(h.remote.rows(Collection::Transactions, &owner(ALICE)).len(), 1);
    assert!(tab.errors().is_empty());
}

#[tokio::test]
async fn zero_row_delete_with_row_still_present_is_restored() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1", "a2", "a3"]).await;
    h.remote.report_zero_rows_on_next_delete();

    let err = tab
        .coordinator
        .delete_record(Collection::Transactions, &RecordId::new("a2"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::DeleteUnconfirmed { .. }));
    assert_eq!(
        ids(&tab.coordinator.cache().transactions()),
        vec!["a1", "a2", "a3"]
    );
}

#[tokio::test]
async fn zero_row_delete_with_row_gone_succeeds() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1", "a2"]).await;
    // Already deleted from another device.
    h.remote
        .remove_row(Collection::Transactions, &RecordId::new("a2"));

    tab.coordinator
        .delete_record(Collection::Transactions, &RecordId::new("a2"))
        .await
        .unwrap();

    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a1"]);
    assert!(tab.errors().is_empty());
}

#[tokio::test]
async fn deleting_unknown_record_is_not_found() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1"]).await;

    let err = tab
        .coordinator
        .delete_record(Collection::Transactions, &RecordId::new("nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotFound { .. }));
    assert_eq!(h.remote.calls(RemoteOp::Delete), 0);
}

// ============================================================================
// update
// ============================================================================

#[tokio::test]
async fn update_keeps_identity_fields_from_cache() {
    let h = Harness::new();
    let created = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let mut seeded = expense("a1", ALICE, "Food");
    seeded.created_at = Some(created);
    h.remote.seed(seeded);
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();

    let mut edit = expense("a1", BOB, "  Groceries ");
    edit.created_at = None;
    let updated = tab.coordinator.update_record(edit).await.unwrap();

    assert_eq!(updated.owner_id(), &owner(ALICE));
    assert_eq!(updated.created_at(), Some(created));
    assert_eq!(updated.category(), "Groceries");
    let remote_rows = h.remote.rows(Collection::Transactions, &owner(ALICE));
    assert_eq!(remote_rows[0].category(), "Groceries");
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_update_stays_applied_locally() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1"]).await;
    h.remote
        .fail_times(RemoteOp::Update, RemoteError::network("offline"), 3);

    let err = tab
        .coordinator
        .update_record(expense("a1", ALICE, "Groceries"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::UpdateNotConfirmed(_)));
    assert_eq!(tab.coordinator.cache().transactions()[0].category, "Groceries");
    assert_eq!(tab.errors()[0].kind, SyncErrorKind::Transient);
}

#[tokio::test(start_paused = true)]
async fn forced_load_during_pending_update_keeps_the_local_edit() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1"]).await;
    h.remote.set_latency(Duration::from_millis(20));
    h.remote
        .fail_times(RemoteOp::Update, RemoteError::network("offline"), 3);

    let (updated, loaded) = tokio::join!(
        tab.coordinator
            .update_record(expense("a1", ALICE, "Groceries")),
        async {
            held_in_flight(&h, RemoteOp::Update).await;
            tab.coordinator.load_authoritative(&owner(ALICE), true).await
        },
    );

    assert_eq!(loaded, LoadOutcome::Loaded);
    assert!(matches!(updated, Err(SyncError::UpdateNotConfirmed(_))));
    let remote_rows = h.remote.rows(Collection::Transactions, &owner(ALICE));
    assert_eq!(remote_rows[0].category(), "Food");
    assert_eq!(tab.coordinator.cache().transactions()[0].category, "Groceries");
}

#[tokio::test]
async fn rejected_update_rolls_back() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &["a1", "a2"]).await;
    h.remote.fail_next(
        RemoteOp::Update,
        RemoteError::validation("violates check constraint"),
    );

    let err = tab
        .coordinator
        .update_record(expense("a2", ALICE, "Groceries"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Rejected(_)));
    let cached = tab.coordinator.cache().transactions();
    assert_eq!(ids(&cached), vec!["a1", "a2"]);
    assert_eq!(cached[1].category, "Food");
    assert_eq!(h.remote.calls(RemoteOp::Update), 1);
}

#[tokio::test]
async fn updating_missing_record_is_not_found() {
    let h = Harness::new();
    let tab = signed_in_with(&h, &[]).await;

    let err = tab
        .coordinator
        .update_record(Record::from(expense("ghost", ALICE, "Food")))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NotFound { .. }));
}
