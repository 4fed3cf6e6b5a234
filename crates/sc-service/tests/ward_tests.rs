//! Ward variant integration tests.
//!
//! Covers:
//! - Placement on connect (supervisor, zone occupant, bystander)
//! - Zone-scoped update routing
//! - Manual and automatic ward session termination, unknown ids ignored
//! - Re-join after assignments change

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use common::types::{OrganisationId, WardSessionId};
use sc_service::actors::Room;
use sc_service::models::{EndedBy, Identity, RoleKind, WardStatus, ZoneId};
use sc_service::protocol::{ClientCommand, ServerEvent};
use sc_service::tasks::{start_ward_expiry, WardExpiryConfig};
use sc_test_utils::{InMemoryStore, TestCoordinator, TestIdentity, TestWardSession};
use serde_json::json;
use tokio_util::sync::CancellationToken;

struct Ward {
    lead: Identity,
    north: Identity,
    south: Identity,
    visitor: Identity,
}

fn seed_staff(store: &InMemoryStore) -> Ward {
    let org = OrganisationId::new();
    let staff = |name: &str, role: RoleKind| {
        store.add_identity(TestIdentity::new(name).role(role).organisation(org).build())
    };
    Ward {
        lead: staff("lead", RoleKind::Faculty),
        north: staff("north", RoleKind::User),
        south: staff("south", RoleKind::User),
        visitor: staff("visitor", RoleKind::User),
    }
}

#[tokio::test]
async fn test_connect_places_by_assignment() {
    let store = InMemoryStore::new();
    let ward = seed_staff(&store);
    let ward_session = store.add_ward_session(
        TestWardSession::new(ward.lead.id)
            .zone("bay-a", ward.north.id)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    let mut lead = coordinator.connect_ward("lead").await.unwrap();
    let mut north = coordinator.connect_ward("north").await.unwrap();
    let mut visitor = coordinator.connect_ward("visitor").await.unwrap();

    assert_eq!(
        lead.next_event().await,
        ServerEvent::WardJoined {
            ward_session_id: ward_session.id,
            supervisor: true,
            zone: None,
        }
    );
    assert_eq!(
        north.next_event().await,
        ServerEvent::WardJoined {
            ward_session_id: ward_session.id,
            supervisor: false,
            zone: Some(ZoneId::new("bay-a")),
        }
    );
    visitor.assert_silent().await;

    let north_rooms = north.rooms().await.unwrap();
    assert!(north_rooms.contains(&Room::Ward(ward_session.id)));
    assert!(north_rooms.contains(&Room::Zone(ward_session.id, ZoneId::new("bay-a"))));
    assert!(!north_rooms.contains(&Room::WardSupervisor(ward_session.id)));
}

#[tokio::test]
async fn test_ward_endpoint_authenticates_by_username_only() {
    let store = InMemoryStore::new();
    seed_staff(&store);

    let coordinator = TestCoordinator::new(store);
    assert!(coordinator.connect_ward("north").await.is_ok());
    assert!(coordinator
        .connect_ward("north@example.org")
        .await
        .is_err());
}

#[tokio::test]
async fn test_zone_update_reaches_zone_and_supervisors_only() {
    let store = InMemoryStore::new();
    let ward = seed_staff(&store);
    let ward_session = store.add_ward_session(
        TestWardSession::new(ward.lead.id)
            .zone("bay-a", ward.north.id)
            .zone("bay-b", ward.south.id)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    let mut lead = coordinator.connect_ward("lead").await.unwrap();
    let mut north = coordinator.connect_ward("north").await.unwrap();
    let mut south = coordinator.connect_ward("south").await.unwrap();
    for client in [&mut lead, &mut north, &mut south] {
        assert!(matches!(
            client.next_event().await,
            ServerEvent::WardJoined { .. }
        ));
    }

    north
        .send(&ClientCommand::WardUpdate {
            ward_session_id: ward_session.id,
            zone: Some(ZoneId::new("bay-a")),
            payload: json!({"bed": 4, "status": "deteriorating"}),
        })
        .await;

    assert_eq!(
        lead.next_event().await,
        ServerEvent::WardUpdate {
            ward_session_id: ward_session.id,
            zone: Some(ZoneId::new("bay-a")),
            from: ward.north.id,
            payload: json!({"bed": 4, "status": "deteriorating"}),
        }
    );
    south.assert_silent().await;
    north.assert_silent().await;

    lead.send(&ClientCommand::WardUpdate {
        ward_session_id: ward_session.id,
        zone: Some(ZoneId::new("bay-a")),
        payload: json!({"bed": 4, "escalate": "rapid response"}),
    })
    .await;
    assert_eq!(
        north.next_event().await,
        ServerEvent::WardUpdate {
            ward_session_id: ward_session.id,
            zone: Some(ZoneId::new("bay-a")),
            from: ward.lead.id,
            payload: json!({"bed": 4, "escalate": "rapid response"}),
        }
    );
    south.assert_silent().await;
    lead.assert_silent().await;

    // Untagged updates go to the whole ward, once per connection.
    lead.send(&ClientCommand::WardUpdate {
        ward_session_id: ward_session.id,
        zone: None,
        payload: json!({"handover": true}),
    })
    .await;
    assert!(matches!(
        north.next_event().await,
        ServerEvent::WardUpdate { zone: None, .. }
    ));
    assert!(matches!(
        south.next_event().await,
        ServerEvent::WardUpdate { zone: None, .. }
    ));
    lead.assert_silent().await;
}

#[tokio::test]
async fn test_bystander_cannot_send_updates() {
    let store = InMemoryStore::new();
    let ward = seed_staff(&store);
    let ward_session = store.add_ward_session(TestWardSession::new(ward.lead.id).build());

    let coordinator = TestCoordinator::new(store);
    let mut visitor = coordinator.connect_ward("visitor").await.unwrap();

    visitor
        .send(&ClientCommand::WardUpdate {
            ward_session_id: ward_session.id,
            zone: None,
            payload: json!({}),
        })
        .await;
    assert!(matches!(
        visitor.next_event().await,
        ServerEvent::Error { code: 3, .. }
    ));
}

#[tokio::test]
async fn test_rejoin_picks_up_new_assignment() {
    let store = InMemoryStore::new();
    let ward = seed_staff(&store);
    let ward_session = store.add_ward_session(TestWardSession::new(ward.lead.id).build());

    let coordinator = TestCoordinator::new(store);
    let mut visitor = coordinator.connect_ward("visitor").await.unwrap();
    visitor.assert_silent().await;

    let mut reassigned = ward_session.clone();
    reassigned
        .assignments
        .zones
        .insert(ZoneId::new("bay-c"), ward.visitor.id);
    coordinator.store().add_ward_session(reassigned);

    visitor.send(&ClientCommand::Rejoin).await;
    assert_eq!(
        visitor.next_event().await,
        ServerEvent::WardJoined {
            ward_session_id: ward_session.id,
            supervisor: false,
            zone: Some(ZoneId::new("bay-c")),
        }
    );
}

#[tokio::test]
async fn test_starter_ends_ward_session() {
    let store = InMemoryStore::new();
    let ward = seed_staff(&store);
    let ward_session = store.add_ward_session(
        TestWardSession::new(ward.lead.id)
            .zone("bay-a", ward.north.id)
            .build(),
    );

    let coordinator = TestCoordinator::new(store);
    let mut lead = coordinator.connect_ward("lead").await.unwrap();
    let mut north = coordinator.connect_ward("north").await.unwrap();
    lead.next_event().await;
    north.next_event().await;

    // A zone occupant may not end it.
    north
        .send(&ClientCommand::EndWardSession {
            ward_session_id: ward_session.id,
        })
        .await;
    assert!(matches!(
        north.next_event().await,
        ServerEvent::Error { code: 3, .. }
    ));

    lead.send(&ClientCommand::EndWardSession {
        ward_session_id: ward_session.id,
    })
    .await;

    let expected = ServerEvent::WardSessionEnded {
        ward_session_id: ward_session.id,
        ended_by: EndedBy::Identity(ward.lead.id),
    };
    assert_eq!(north.next_event().await, expected);
    assert_eq!(lead.next_event().await, expected);
    assert!(north
        .rooms()
        .await
        .unwrap()
        .iter()
        .all(|room| !room.is_ward_room_of(ward_session.id)));

    let stored = coordinator.store().ward_session(ward_session.id).unwrap();
    assert_eq!(stored.status, WardStatus::Completed);
    assert_eq!(stored.ended_by, Some(EndedBy::Identity(ward.lead.id)));

    // Ending again is a silent no-op.
    lead.send(&ClientCommand::EndWardSession {
        ward_session_id: ward_session.id,
    })
    .await;
    lead.assert_silent().await;
    assert_eq!(coordinator.store().ward_transitions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overdue_ward_session_completes_automatically() {
    let store = InMemoryStore::new();
    let ward = seed_staff(&store);
    let overdue = store.add_ward_session(
        TestWardSession::new(ward.lead.id)
            .zone("bay-a", ward.north.id)
            .started_at(Utc::now() - Duration::hours(2))
            .duration_minutes(60)
            .build(),
    );
    let current = store.add_ward_session(TestWardSession::new(ward.lead.id).build());

    let coordinator = TestCoordinator::new(store);
    let mut north = coordinator.connect_ward("north").await.unwrap();
    north.next_event().await;

    let cancel_token = CancellationToken::new();
    let task = tokio::spawn(start_ward_expiry(
        coordinator.state().ward.clone(),
        WardExpiryConfig {
            check_interval_seconds: 60,
        },
        cancel_token.clone(),
    ));

    assert_eq!(
        north.next_event().await,
        ServerEvent::WardSessionEnded {
            ward_session_id: overdue.id,
            ended_by: EndedBy::Auto,
        }
    );

    let store = coordinator.store();
    let stored = store.ward_session(overdue.id).unwrap();
    assert_eq!(stored.status, WardStatus::Completed);
    assert_eq!(stored.ended_by, Some(EndedBy::Auto));
    assert_eq!(
        store.ward_session(current.id).unwrap().status,
        WardStatus::Active
    );

    cancel_token.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_ending_unknown_ward_session_is_silent() {
    let store = InMemoryStore::new();
    seed_staff(&store);
    store.add_identity(TestIdentity::new("admin").role(RoleKind::Admin).build());

    let coordinator = TestCoordinator::new(store);
    let mut admin = coordinator.connect_ward("admin").await.unwrap();

    admin
        .send(&ClientCommand::EndWardSession {
            ward_session_id: WardSessionId::new(),
        })
        .await;
    admin.assert_silent().await;
    assert_eq!(coordinator.store().ward_transitions(), 0);
}
