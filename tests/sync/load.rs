use std::time::Duration;

use financeflow_sync::{
    remote::{AuthEvent, RemoteOp, RemoteStore},
    Collection, LoadOutcome, SessionState, SyncErrorKind, SyncStatus,
};

use crate::common::*;

#[tokio::test]
async fn load_returns_only_the_signed_in_owners_rows() {
    let h = Harness::new();
    for id in ["a1", "a2", "a3"] {
        h.remote.seed(expense(id, ALICE, "Food"));
    }
    for id in ["b1", "b2"] {
        h.remote.seed(expense(id, BOB, "Rent"));
    }
    h.remote.seed(goal("g1", ALICE));

    let tab = h.tab();
    let outcome = tab.coordinator.sign_in(&alice()).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Loaded);
    assert!(tab.coordinator.is_loaded());
    let mut loaded = ids(&tab.coordinator.cache().transactions());
    loaded.sort();
    assert_eq!(loaded, vec!["a1", "a2", "a3"]);
    assert_eq!(tab.coordinator.cache().budget_goals().len(), 1);
    assert_eq!(tab.coordinator.status(), SyncStatus::Idle);
}

#[tokio::test]
async fn switching_identity_never_shows_previous_owners_rows() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    h.remote.seed(expense("b1", BOB, "Rent"));

    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    tab.coordinator.sign_out();
    assert!(tab.coordinator.cache().is_empty());

    tab.coordinator.sign_in(&bob()).await.unwrap();
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["b1"]);
    assert!(tab
        .coordinator
        .cache()
        .transactions()
        .iter()
        .all(|t| t.owner_id == owner(BOB)));
}

#[tokio::test(start_paused = true)]
async fn concurrent_loads_for_one_identity_read_once() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    let before = h.remote.select_calls(Collection::Transactions);

    h.remote.set_latency(Duration::from_millis(50));
    let u1 = owner(ALICE);
    let (first, second) = tokio::join!(
        tab.coordinator.load_authoritative(&u1, true),
        tab.coordinator.load_authoritative(&u1, true),
    );

    assert_eq!(first, LoadOutcome::Loaded);
    assert_eq!(second, LoadOutcome::Deduplicated);
    assert_eq!(h.remote.select_calls(Collection::Transactions), before + 1);
}

#[tokio::test]
async fn unforced_load_of_loaded_identity_is_a_no_op() {
    let h = Harness::new();
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    let before = h.remote.calls(RemoteOp::Select);

    let outcome = tab.coordinator.load_authoritative(&owner(ALICE), false).await;
    assert_eq!(outcome, LoadOutcome::AlreadyLoaded);
    assert_eq!(h.remote.calls(RemoteOp::Select), before);
}

#[tokio::test]
async fn load_for_inactive_identity_is_refused() {
    let h = Harness::new();
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();

    let outcome = tab.coordinator.load_authoritative(&owner(BOB), true).await;
    assert_eq!(outcome, LoadOutcome::NoIdentity);
}

#[tokio::test(start_paused = true)]
async fn identity_change_discards_in_flight_load() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    h.remote.seed(expense("b1", BOB, "Rent"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();

    h.remote.set_latency(Duration::from_millis(100));
    let mut status = tab.coordinator.subscribe_status();
    let coordinator = tab.coordinator.clone();
    let stale = tokio::spawn(async move {
        coordinator.load_authoritative(&owner(ALICE), true).await
    });
    status
        .wait_for(|s| *s == SyncStatus::Syncing)
        .await
        .unwrap();

    h.remote.set_latency(Duration::ZERO);
    let session = h.remote.sign_in(&bob()).await.unwrap();
    let outcome = tab
        .coordinator
        .apply_auth_event(AuthEvent::SignedIn(session))
        .await;

    assert_eq!(outcome, Some(LoadOutcome::Loaded));
    assert_eq!(stale.await.unwrap(), LoadOutcome::Superseded);
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["b1"]);
    assert!(tab.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_reload_keeps_last_known_good_data() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    h.remote.seed(expense("a2", ALICE, "Fuel"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();

    h.fail_loads(1);
    let outcome = tab.coordinator.load_authoritative(&owner(ALICE), true).await;

    assert_eq!(outcome, LoadOutcome::Degraded { from_mirror: false });
    assert_eq!(tab.coordinator.cache().transactions().len(), 2);
    assert_eq!(tab.coordinator.status(), SyncStatus::Degraded);
    assert!(!tab.coordinator.status().is_blocking());
}

#[tokio::test(start_paused = true)]
async fn offline_start_restores_mirror_then_recovers_in_background() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    h.remote.seed(goal("g1", ALICE));
    {
        let first = h.tab();
        first.coordinator.sign_in(&alice()).await.unwrap();
    }

    // A reopened tab finds the backend session but cannot read rows.
    h.fail_loads(1);
    let tab = h.tab();
    let outcome = tab.coordinator.bootstrap().await;

    assert_eq!(outcome, LoadOutcome::Degraded { from_mirror: true });
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a1"]);
    assert_eq!(tab.coordinator.cache().budget_goals().len(), 1);
    assert!(!tab.coordinator.is_loaded());

    h.remote.seed(expense("a2", ALICE, "Fuel"));
    let mut status = tab.coordinator.subscribe_status();
    status
        .wait_for(|s| *s == SyncStatus::Idle)
        .await
        .unwrap();
    assert!(tab.coordinator.is_loaded());
    assert_eq!(tab.coordinator.cache().transactions().len(), 2);
}

#[tokio::test]
async fn unauthorized_load_signs_out() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();

    h.remote.expire_session();
    let outcome = tab.coordinator.load_authoritative(&owner(ALICE), true).await;

    assert_eq!(outcome, LoadOutcome::SignedOut);
    assert!(tab.coordinator.cache().is_empty());
    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert_eq!(tab.coordinator.status(), SyncStatus::SignedOut);
    let errors = tab.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, SyncErrorKind::Auth);
}
