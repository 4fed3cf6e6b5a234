//! # SC Test Utilities
//!
//! Shared test utilities for the Session Coordinator (SC) service.
//!
//! This crate provides:
//! - `InMemoryStore` - identity, session and ward session stores with the
//!   same conditional-update semantics as the Postgres repositories, plus
//!   failure injection
//! - `fixtures` - builders for identities, sessions and ward sessions
//! - `TestCoordinator` / `TestClient` - application state wired to the
//!   in-memory store, with clients that go through the same open, dispatch
//!   and close path as a real WebSocket
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = InMemoryStore::new();
//!     let org = OrganisationId::new();
//!     let creator = store.add_identity(TestIdentity::new("creator").organisation(org).build());
//!     let session = store.add_session(TestSession::new(org, creator.id).build());
//!
//!     let coordinator = TestCoordinator::new(store);
//!     let mut client = coordinator.connect_sessions("creator").await.unwrap();
//!     client.join(session.id).await;
//!     assert!(matches!(client.next_event().await, ServerEvent::Joined { .. }));
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod in_memory_store;

pub use fixtures::*;
pub use harness::*;
pub use in_memory_store::*;
