//! Session lifecycle integration tests.
//!
//! Covers:
//! - Explicit end by the creator, idempotent on repeat
//! - Permission checks for ending
//! - Scheduled expiry reaching the creator's organisation within one tick
//! - Per-session store failures not aborting an expiry pass
//! - Ending an unknown session being a silent no-op

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use common::types::{IdentityId, OrganisationId, SessionId};
use sc_service::actors::Room;
use sc_service::models::{RoleKind, SessionState};
use sc_service::protocol::{ClientCommand, EndReason, ServerEvent};
use sc_service::tasks::{start_session_expiry, SessionExpiryConfig};
use sc_test_utils::{InMemoryStore, TestCoordinator, TestIdentity, TestSession};
use tokio_util::sync::CancellationToken;

fn is_session_ended(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::SessionEnded { .. })
}

#[tokio::test]
async fn test_creator_ends_session_once() {
    let store = InMemoryStore::new();
    let org = OrganisationId::new();
    let creator = store.add_identity(
        TestIdentity::new("host")
            .role(RoleKind::Faculty)
            .organisation(org)
            .build(),
    );
    store.add_identity(TestIdentity::new("ada").organisation(org).build());
    store.add_identity(TestIdentity::new("lurker").organisation(org).build());
    let session = store.add_session(TestSession::new(org, creator.id).build());

    let coordinator = TestCoordinator::new(store);
    let mut host = coordinator.connect_sessions("host").await.unwrap();
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();
    let mut lurker = coordinator.connect_sessions("lurker").await.unwrap();
    host.join(session.id).await;
    ada.join(session.id).await;
    ada.next_matching(|e| matches!(e, ServerEvent::Joined { .. }))
        .await;

    host.send(&ClientCommand::EndSession {
        session_id: session.id,
    })
    .await;

    let expected = ServerEvent::SessionEnded {
        session_id: session.id,
        reason: EndReason::Ended,
    };
    assert_eq!(ada.next_matching(is_session_ended).await, expected);
    assert_eq!(lurker.next_matching(is_session_ended).await, expected);
    assert_eq!(host.next_matching(is_session_ended).await, expected);

    // Delivered once per connection even though ada is in both rooms.
    ada.assert_silent().await;
    assert!(!ada.rooms().await.unwrap().contains(&Room::Session(session.id)));
    assert_eq!(
        coordinator.store().session(session.id).unwrap().state,
        SessionState::Ended
    );

    host.send(&ClientCommand::EndSession {
        session_id: session.id,
    })
    .await;
    host.assert_silent().await;
    lurker.assert_silent().await;
    assert_eq!(coordinator.store().session_transitions(), 1);
}

#[tokio::test]
async fn test_non_creator_cannot_end_session() {
    let store = InMemoryStore::new();
    let org = OrganisationId::new();
    let creator = store.add_identity(
        TestIdentity::new("host")
            .role(RoleKind::Faculty)
            .organisation(org)
            .build(),
    );
    store.add_identity(TestIdentity::new("ada").organisation(org).build());
    let session = store.add_session(TestSession::new(org, creator.id).build());

    let coordinator = TestCoordinator::new(store);
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();

    ada.send(&ClientCommand::EndSession {
        session_id: session.id,
    })
    .await;

    assert!(matches!(
        ada.next_event().await,
        ServerEvent::Error { code: 3, .. }
    ));
    assert_eq!(coordinator.store().session_transitions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overdue_session_expires_within_one_tick() {
    let store = InMemoryStore::new();
    let org = OrganisationId::new();
    let creator = store.add_identity(
        TestIdentity::new("host")
            .role(RoleKind::Faculty)
            .organisation(org)
            .build(),
    );
    store.add_identity(TestIdentity::new("ada").organisation(org).build());
    let session = store.add_session(
        TestSession::new(org, creator.id)
            .started_at(Utc::now() - Duration::minutes(10))
            .duration_minutes(5)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();

    let cancel_token = CancellationToken::new();
    let task = tokio::spawn(start_session_expiry(
        coordinator.state().lifecycle.clone(),
        SessionExpiryConfig {
            check_interval_seconds: 60,
        },
        cancel_token.clone(),
    ));

    assert_eq!(
        ada.next_event().await,
        ServerEvent::SessionEnded {
            session_id: session.id,
            reason: EndReason::Expired,
        }
    );
    assert_eq!(
        coordinator.store().session(session.id).unwrap().state,
        SessionState::Ended
    );

    // Later ticks find nothing left to do.
    tokio::time::advance(std::time::Duration::from_secs(61)).await;
    ada.assert_silent().await;
    assert_eq!(coordinator.store().session_transitions(), 1);

    cancel_token.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_expiry_failure_on_one_session_does_not_block_others() {
    let store = InMemoryStore::new();
    let org = OrganisationId::new();
    let creator = store.add_identity(TestIdentity::new("host").organisation(org).build());
    let overdue = |store: &InMemoryStore| {
        store.add_session(
            TestSession::new(org, creator.id)
                .started_at(Utc::now() - Duration::hours(2))
                .duration_minutes(30)
                .build(),
        )
    };
    let broken = overdue(&store);
    let healthy = overdue(&store);
    let upcoming = store.add_session(TestSession::new(org, creator.id).build());
    store.fail_end_of(broken.id);

    let coordinator = TestCoordinator::new(store);
    let expired = coordinator
        .state()
        .lifecycle
        .expire_due(Utc::now())
        .await
        .unwrap();

    assert_eq!(expired, 1);
    let store = coordinator.store();
    assert_eq!(store.session(healthy.id).unwrap().state, SessionState::Ended);
    assert_eq!(store.session(broken.id).unwrap().state, SessionState::Active);
    assert_eq!(store.session(upcoming.id).unwrap().state, SessionState::Active);
}

#[tokio::test]
async fn test_expiry_pass_reports_unavailable_store() {
    let store = InMemoryStore::new();
    store.fail_reads(true);

    let coordinator = TestCoordinator::new(store);
    let result = coordinator
        .state()
        .lifecycle
        .expire_due(Utc::now())
        .await;

    assert!(matches!(
        result,
        Err(sc_service::errors::ScError::TransientStore(_))
    ));
}

#[tokio::test]
async fn test_ending_unknown_session_is_silent() {
    let store = InMemoryStore::new();
    store.add_identity(TestIdentity::new("admin").role(RoleKind::Admin).build());

    let coordinator = TestCoordinator::new(store);
    let mut admin = coordinator.connect_sessions("admin").await.unwrap();

    admin
        .send(&ClientCommand::EndSession {
            session_id: SessionId::new(),
        })
        .await;
    admin.assert_silent().await;
    assert_eq!(coordinator.store().session_transitions(), 0);
}

#[tokio::test]
async fn test_expiry_reaches_creator_organisation_not_session_organisation() {
    let store = InMemoryStore::new();
    let creator_org = OrganisationId::new();
    let session_org = OrganisationId::new();
    let creator = store.add_identity(
        TestIdentity::new("host")
            .role(RoleKind::Faculty)
            .organisation(creator_org)
            .build(),
    );
    store.add_identity(TestIdentity::new("colleague").organisation(creator_org).build());
    store.add_identity(TestIdentity::new("trainee").organisation(session_org).build());
    let session = store.add_session(
        TestSession::new(session_org, creator.id)
            .started_at(Utc::now() - Duration::hours(1))
            .duration_minutes(30)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    let mut colleague = coordinator.connect_sessions("colleague").await.unwrap();
    let mut trainee = coordinator.connect_sessions("trainee").await.unwrap();

    let expired = coordinator
        .state()
        .lifecycle
        .expire_due(Utc::now())
        .await
        .unwrap();
    assert_eq!(expired, 1);

    assert_eq!(
        colleague.next_event().await,
        ServerEvent::SessionEnded {
            session_id: session.id,
            reason: EndReason::Expired,
        }
    );
    trainee.assert_silent().await;
}

#[tokio::test]
async fn test_expiry_falls_back_to_session_organisation_without_creator() {
    let store = InMemoryStore::new();
    let org = OrganisationId::new();
    store.add_identity(TestIdentity::new("ada").organisation(org).build());
    let session = store.add_session(
        TestSession::new(org, IdentityId::new())
            .started_at(Utc::now() - Duration::hours(1))
            .duration_minutes(30)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();

    coordinator
        .state()
        .lifecycle
        .expire_due(Utc::now())
        .await
        .unwrap();

    assert_eq!(
        ada.next_event().await,
        ServerEvent::SessionEnded {
            session_id: session.id,
            reason: EndReason::Expired,
        }
    );
}

#[tokio::test]
async fn test_expiry_counts_session_even_when_announcement_fails() {
    let store = InMemoryStore::new();
    let org = OrganisationId::new();
    let creator = store.add_identity(TestIdentity::new("host").organisation(org).build());
    let session = store.add_session(
        TestSession::new(org, creator.id)
            .started_at(Utc::now() - Duration::hours(1))
            .duration_minutes(30)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    coordinator.session_registry().shutdown().await.unwrap();

    let lifecycle = &coordinator.state().lifecycle;
    assert_eq!(lifecycle.expire_due(Utc::now()).await.unwrap(), 1);
    assert_eq!(
        coordinator.store().session(session.id).unwrap().state,
        SessionState::Ended
    );

    // Nothing left to retry on the next pass.
    assert_eq!(lifecycle.expire_due(Utc::now()).await.unwrap(), 0);
    assert_eq!(coordinator.store().session_transitions(), 1);
}
