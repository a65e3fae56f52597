use financeflow_sync::{
    remote::RemoteOp, Account, BroadcastTransport, CalendarDate, CrossTabEvent, EntryType,
    LoadOutcome, SessionState, SyncStatus, Transaction,
};

use crate::common::*;

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn coffee() -> Transaction {
    Transaction::new(
        CalendarDate::parse("2025-03-02").unwrap(),
        "3.20".parse().unwrap(),
        EntryType::Expense,
        Account::Cash,
        "Coffee",
    )
}

#[tokio::test]
async fn sign_out_in_one_tab_signs_out_the_others() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let first = h.tab();
    let second = h.tab();
    first.coordinator.sign_in(&alice()).await.unwrap();
    second.coordinator.sign_in(&alice()).await.unwrap();
    let _listener = second.coordinator.spawn_cross_tab_listener().unwrap();
    let mut status = second.coordinator.subscribe_status();

    first.coordinator.sign_out();
    status
        .wait_for(|s| *s == SyncStatus::SignedOut)
        .await
        .unwrap();

    assert_eq!(second.coordinator.session().state(), SessionState::Anonymous);
    assert!(second.coordinator.cache().is_empty());
}

#[tokio::test]
async fn other_tabs_reload_after_a_write_without_echoing() {
    let h = Harness::new();
    let first = h.tab();
    let second = h.tab();
    first.coordinator.sign_in(&alice()).await.unwrap();
    second.coordinator.sign_in(&alice()).await.unwrap();
    let _first_listener = first.coordinator.spawn_cross_tab_listener().unwrap();
    let _second_listener = second.coordinator.spawn_cross_tab_listener().unwrap();
    let mut wire = h.hub.subscribe().unwrap();
    let selects = h.remote.calls(RemoteOp::Select);

    first.coordinator.create_record(coffee()).await.unwrap();
    let mut revision = second.coordinator.cache().subscribe();
    revision
        .wait_for(|_| second.coordinator.cache().transactions().len() == 1)
        .await
        .unwrap();
    settle().await;

    // One read-after-write in the writing tab, one full load in the other.
    assert_eq!(h.remote.calls(RemoteOp::Select), selects + 1 + 3);
    let mut posted = Vec::new();
    while let Ok(message) = wire.try_recv() {
        posted.push(message);
    }
    assert_eq!(posted.len(), 1, "unexpected cross-tab traffic: {posted:?}");
    assert!(posted[0].contains("data-changed"));
}

#[tokio::test]
async fn data_changed_while_anonymous_reloads_local_records() {
    let h = Harness::new();
    let writer = h.tab();
    let reader = h.tab();
    writer.coordinator.bootstrap().await;
    reader.coordinator.bootstrap().await;

    writer.coordinator.create_record(coffee()).await.unwrap();
    assert!(reader.coordinator.cache().is_empty());

    let outcome = reader
        .coordinator
        .apply_cross_tab_event(CrossTabEvent::DataChanged)
        .await;

    assert_eq!(outcome, None);
    assert_eq!(reader.coordinator.cache().transactions().len(), 1);
}

#[tokio::test]
async fn data_changed_for_signed_in_tab_forces_reload() {
    let h = Harness::new();
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    h.remote.seed(expense("a9", ALICE, "Fuel"));

    let outcome = tab
        .coordinator
        .apply_cross_tab_event(CrossTabEvent::DataChanged)
        .await;

    assert_eq!(outcome, Some(LoadOutcome::Loaded));
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a9"]);
}

#[tokio::test]
async fn cross_tab_listener_requires_a_transport() {
    let h = Harness::new();
    let options = financeflow_sync::SyncCoordinatorOptions::new(h.remote.clone(), h.mirror.clone());
    let tab = financeflow_sync::SyncCoordinator::new(options).unwrap();
    assert!(tab.spawn_cross_tab_listener().is_none());
}
