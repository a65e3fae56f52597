use financeflow_sync::{
    remote::{AuthEvent, RemoteOp, RemoteStore},
    Collection, Credentials, LoadOutcome, RemoteError, SessionState, SyncError, SyncPhase,
    SyncStatus,
};

use crate::common::*;

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn token_refresh_does_not_reload() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    let selects = h.remote.calls(RemoteOp::Select);
    let revision = tab.coordinator.cache().revision();

    tab.coordinator.refresh_session().await.unwrap();
    let session = tab.coordinator.session().session().unwrap();
    let outcome = tab
        .coordinator
        .apply_auth_event(AuthEvent::TokenRefreshed(session))
        .await;

    assert_eq!(outcome, Some(LoadOutcome::AlreadyLoaded));
    assert_eq!(h.remote.calls(RemoteOp::Select), selects);
    assert_eq!(tab.coordinator.cache().revision(), revision);
    assert_eq!(tab.coordinator.status(), SyncStatus::Idle);
}

#[tokio::test]
async fn signing_in_again_as_same_identity_keeps_cache() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    assert_eq!(
        tab.coordinator.sign_in(&alice()).await.unwrap(),
        LoadOutcome::Loaded
    );
    let selects = h.remote.calls(RemoteOp::Select);

    let again = tab.coordinator.sign_in(&alice()).await.unwrap();

    assert_eq!(again, LoadOutcome::AlreadyLoaded);
    assert_eq!(h.remote.calls(RemoteOp::Select), selects);
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a1"]);
}

#[tokio::test]
async fn signing_in_as_someone_else_replaces_cache() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    h.remote.seed(expense("b1", BOB, "Rent"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();

    let outcome = tab.coordinator.sign_in(&bob()).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Loaded);
    assert_eq!(tab.coordinator.active_owner(), Some(owner(BOB)));
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["b1"]);
}

#[tokio::test]
async fn wrong_password_reports_and_stays_anonymous() {
    let h = Harness::new();
    let tab = h.tab();

    let err = tab
        .coordinator
        .sign_in(&Credentials::new("alice@example.com", "nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Authentication(_)));
    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    let errors = tab.errors();
    assert_eq!(errors[0].phase, SyncPhase::SignIn);
    assert_eq!(errors[0].message, "Invalid email or password.");
}

#[tokio::test]
async fn rejected_sign_in_drops_previous_identity() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    let other = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    other.coordinator.sign_in(&alice()).await.unwrap();
    let _listener = other.coordinator.spawn_cross_tab_listener().unwrap();
    let mut other_status = other.coordinator.subscribe_status();

    let err = tab
        .coordinator
        .sign_in(&Credentials::new("alice@example.com", "nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Authentication(_)));
    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert_eq!(tab.coordinator.active_owner(), None);
    assert_eq!(tab.coordinator.status(), SyncStatus::SignedOut);
    assert!(tab.coordinator.cache().is_empty());
    assert!(h.mirror.is_empty());

    other_status
        .wait_for(|s| *s == SyncStatus::SignedOut)
        .await
        .unwrap();
    assert!(other.coordinator.cache().is_empty());

    let created = tab
        .coordinator
        .create_record(expense("", "ignored", "Coffee"))
        .await
        .unwrap();
    assert!(created.owner_id().is_local());
    let cached = tab.coordinator.cache().transactions();
    assert_eq!(cached.len(), 1);
    assert!(cached.iter().all(|t| t.owner_id.is_local()));
}

#[tokio::test]
async fn rejected_refresh_token_signs_out() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    h.remote.revoke_refresh_tokens();

    let err = tab.coordinator.refresh_session().await.unwrap_err();

    assert!(matches!(err, SyncError::Unauthorized(_)));
    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert!(tab.coordinator.cache().is_empty());
    assert!(h.mirror.is_empty());
}

#[tokio::test(start_paused = true)]
async fn refresh_network_failure_keeps_session() {
    let h = Harness::new();
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    h.remote
        .fail_next(RemoteOp::Refresh, RemoteError::network("offline"));

    let err = tab.coordinator.refresh_session().await.unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert!(tab.coordinator.session().state().is_authenticated());
    assert!(tab.coordinator.is_loaded());
}

#[tokio::test]
async fn explicit_sign_out_clears_everything_then_ends_remote_session() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    assert!(!h.mirror.is_empty());

    tab.coordinator.sign_out();

    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert_eq!(tab.coordinator.status(), SyncStatus::SignedOut);
    assert!(tab.coordinator.cache().is_empty());
    assert!(h.mirror.is_empty());

    settle().await;
    assert_eq!(h.remote.calls(RemoteOp::SignOut), 1);
    assert!(h.remote.active_session().is_none());
}

#[tokio::test]
async fn listener_follows_sign_in_from_the_backend() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    let _listener = tab.coordinator.spawn_session_listener();
    let mut status = tab.coordinator.subscribe_status();

    h.remote.sign_in(&alice()).await.unwrap();
    status.wait_for(|s| *s == SyncStatus::Idle).await.unwrap();

    assert_eq!(tab.coordinator.active_owner(), Some(owner(ALICE)));
    assert_eq!(ids(&tab.coordinator.cache().transactions()), vec!["a1"]);
}

#[tokio::test]
async fn listener_clears_cache_when_backend_ends_session() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    let tab = h.tab();
    tab.coordinator.sign_in(&alice()).await.unwrap();
    let _listener = tab.coordinator.spawn_session_listener();
    let mut status = tab.coordinator.subscribe_status();

    h.remote.emit(AuthEvent::SignedOut);
    status
        .wait_for(|s| *s == SyncStatus::SignedOut)
        .await
        .unwrap();

    assert_eq!(tab.coordinator.session().state(), SessionState::Anonymous);
    assert!(tab.coordinator.cache().is_empty());
}

#[tokio::test]
async fn bootstrap_uses_mirrored_session_when_backend_unreachable() {
    let h = Harness::new();
    h.remote.seed(expense("a1", ALICE, "Food"));
    {
        let first = h.tab();
        first.coordinator.sign_in(&alice()).await.unwrap();
    }
    h.remote
        .fail_next(RemoteOp::CurrentSession, RemoteError::network("offline"));

    let tab = h.tab();
    let outcome = tab.coordinator.bootstrap().await;

    assert_eq!(outcome, LoadOutcome::Loaded);
    assert_eq!(tab.coordinator.active_owner(), Some(owner(ALICE)));
    assert_eq!(tab.coordinator.cache().transactions().len(), 1);
}

#[tokio::test]
async fn anonymous_records_survive_a_reopened_tab() {
    let h = Harness::new();
    {
        let first = h.tab();
        assert_eq!(first.coordinator.bootstrap().await, LoadOutcome::NoIdentity);
        first
            .coordinator
            .create_record(expense("", "ignored", "Coffee"))
            .await
            .unwrap();
    }

    let tab = h.tab();
    assert_eq!(tab.coordinator.bootstrap().await, LoadOutcome::NoIdentity);

    let cached = tab.coordinator.cache().transactions();
    assert_eq!(cached.len(), 1);
    assert!(cached[0].owner_id.is_local());
    assert_eq!(h.remote.calls(RemoteOp::Insert), 0);
    assert!(h
        .remote
        .rows(Collection::Transactions, &owner("local"))
        .is_empty());
}
