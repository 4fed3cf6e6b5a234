//! Service layer for the Session Coordinator.
//!
//! Handlers call services; services talk to the room registry and the
//! stores. Every service is cheap to clone and is built once in
//! [`crate::routes::AppState`].
//!
//! - [`gatekeeper`] - authenticate and bind connections
//! - [`admission`] - session join decisions under per-(session, role) locks
//! - [`presence`] - participant lists and departure reconciliation
//! - [`eviction`] - server-initiated participant removal
//! - [`lifecycle`] - explicit end and scheduled session expiry
//! - [`ward`] - ward placement, tagged updates and ward expiry

pub mod admission;
pub mod eviction;
pub mod gatekeeper;
pub mod lifecycle;
pub mod presence;
pub mod ward;

pub use admission::{eligibility_queue, Admission, AdmissionController, AdmissionLocks};
pub use eviction::{Eviction, EvictionCoordinator};
pub use gatekeeper::{ConnectionContext, Gatekeeper, LoginMode};
pub use lifecycle::LifecycleCoordinator;
pub use presence::{participant_list, PresenceRegistry};
pub use ward::{WardCoordinator, WardPlacement};
