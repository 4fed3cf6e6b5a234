//! Eviction integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::{OrganisationId, SessionId};
use sc_service::models::{RoleKind, Session};
use sc_service::protocol::{ClientCommand, ServerEvent};
use sc_test_utils::{InMemoryStore, TestClient, TestCoordinator, TestIdentity, TestSession};

fn seed(store: &InMemoryStore) -> Session {
    let org = OrganisationId::new();
    let creator = store.add_identity(
        TestIdentity::new("host")
            .role(RoleKind::Faculty)
            .organisation(org)
            .build(),
    );
    store.add_identity(TestIdentity::new("ada").organisation(org).build());
    store.add_identity(TestIdentity::new("bo").organisation(org).build());
    store.add_session(TestSession::new(org, creator.id).build())
}

async fn joined(client: &mut TestClient, session_id: SessionId) {
    client.join(session_id).await;
    let answer = client
        .next_matching(|e| {
            matches!(
                e,
                ServerEvent::Joined { .. } | ServerEvent::JoinRejected { .. }
            )
        })
        .await;
    assert!(matches!(answer, ServerEvent::Joined { .. }), "{answer:?}");
}

#[tokio::test]
async fn test_removed_participant_is_notified_and_disconnected() {
    let store = InMemoryStore::new();
    let session = seed(&store);

    let coordinator = TestCoordinator::new(store);
    let mut host = coordinator.connect_sessions("host").await.unwrap();
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();
    let mut bo = coordinator.connect_sessions("bo").await.unwrap();
    joined(&mut host, session.id).await;
    joined(&mut ada, session.id).await;
    joined(&mut bo, session.id).await;

    let ada_id = ada.identity().id;
    host.send(&ClientCommand::RemoveParticipant {
        session_id: session.id,
        target: ada_id,
    })
    .await;

    let before_close = ada.until_closed().await;
    assert_eq!(
        before_close.last(),
        Some(&ServerEvent::RemovalNotice {
            session_id: session.id
        })
    );
    assert!(ada.rooms().await.is_none());

    assert_eq!(
        bo.next_matching(|e| matches!(e, ServerEvent::ParticipantRemoved { .. }))
            .await,
        ServerEvent::ParticipantRemoved {
            session_id: session.id,
            identity: ada_id,
        }
    );
    let ServerEvent::ParticipantListUpdated { participants, .. } = bo
        .next_matching(|e| matches!(e, ServerEvent::ParticipantListUpdated { .. }))
        .await
    else {
        unreachable!()
    };
    assert!(participants.iter().all(|entry| entry.identity != ada_id));
    assert_eq!(coordinator.session_members(session.id).await.len(), 2);
}

#[tokio::test]
async fn test_removing_a_departed_participant_is_a_no_op() {
    let store = InMemoryStore::new();
    let session = seed(&store);

    let coordinator = TestCoordinator::new(store);
    let mut host = coordinator.connect_sessions("host").await.unwrap();
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();
    joined(&mut host, session.id).await;
    joined(&mut ada, session.id).await;

    let ada_id = ada.identity().id;
    ada.close().await;
    host.next_matching(|e| matches!(e, ServerEvent::ParticipantListUpdated { .. }))
        .await;

    host.send(&ClientCommand::RemoveParticipant {
        session_id: session.id,
        target: ada_id,
    })
    .await;

    host.assert_silent().await;
    assert_eq!(
        coordinator.session_members(session.id).await,
        vec![session.created_by]
    );
}

#[tokio::test]
async fn test_user_may_not_remove_participants() {
    let store = InMemoryStore::new();
    let session = seed(&store);

    let coordinator = TestCoordinator::new(store);
    let mut ada = coordinator.connect_sessions("ada").await.unwrap();
    let mut bo = coordinator.connect_sessions("bo").await.unwrap();
    joined(&mut ada, session.id).await;
    joined(&mut bo, session.id).await;

    ada.send(&ClientCommand::RemoveParticipant {
        session_id: session.id,
        target: bo.identity().id,
    })
    .await;

    assert!(matches!(
        ada.next_matching(|e| matches!(e, ServerEvent::Error { .. }))
            .await,
        ServerEvent::Error { code: 3, .. }
    ));
    assert_eq!(coordinator.session_members(session.id).await.len(), 2);
}

#[tokio::test]
async fn test_removal_from_unknown_session_is_silent() {
    let store = InMemoryStore::new();
    seed(&store);
    store.add_identity(TestIdentity::new("admin").role(RoleKind::Admin).build());

    let coordinator = TestCoordinator::new(store);
    let mut admin = coordinator.connect_sessions("admin").await.unwrap();
    let ada = coordinator.connect_sessions("ada").await.unwrap();

    admin
        .send(&ClientCommand::RemoveParticipant {
            session_id: SessionId::new(),
            target: ada.identity().id,
        })
        .await;

    admin.assert_silent().await;
    assert!(ada.rooms().await.is_some());
}
