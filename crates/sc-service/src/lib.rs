//! Session Coordinator (SC) Service Library
//!
//! Real-time coordination for clinical training sessions and ward rounds:
//!
//! - Binds each WebSocket connection to an identity and organisation
//! - Admits participants into session rooms under per-role capacity limits,
//!   with an eligibility queue that favours recently active identities
//! - Keeps participant lists consistent across joins, leaves and disconnects
//! - Ends sessions on request or when they pass their scheduled expiry
//! - Places ward connections into zone rooms and routes tagged updates
//! - Fans entity update feeds out to topic subscribers
//!
//! # Architecture
//!
//! ```text
//! AppState
//! ├── RoomRegistryActor "sessions" ── ConnectionActor (per socket)
//! ├── RoomRegistryActor "ward"     ── ConnectionActor (per socket)
//! ├── services (admission, presence, eviction, lifecycle, ward)
//! └── stores (identities, sessions, ward_sessions)
//!
//! tasks: session_expiry, ward_expiry (interval + CancellationToken)
//! ```
//!
//! All room state lives in the registry actors; services never hold their
//! own membership maps.
//!
//! # Modules
//!
//! - [`actors`] - Room registry and per-connection actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client codes and HTTP mapping
//! - [`handlers`] - WebSocket and internal HTTP handlers
//! - [`services`] - Admission, presence, eviction, lifecycle and ward logic
//! - [`tasks`] - Expiry schedulers

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod protocol;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
