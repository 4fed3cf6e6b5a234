//! Actor model for the Session Coordinator.
//!
//! ```text
//! RoomRegistryActor (one per namespace: "sessions", "ward")
//! ├── owns every live connection and its room memberships
//! ├── serializes join/leave/broadcast so broadcasts see consistent rooms
//! └── fans out to N ConnectionActors
//!     └── ConnectionActor (one per WebSocket)
//!         └── forwards events, in order, to the socket writer
//! ```
//!
//! # Key Design Decisions
//!
//! - **Injectable registry**: created and torn down explicitly, never global
//! - **CancellationToken propagation**: connection actors hold child tokens of
//!   their registry, so registry shutdown reaches every socket
//! - **Non-blocking fan-out**: a full connection mailbox drops the event for
//!   that connection only
//! - **Mailbox monitoring**: depth thresholds (Registry: 500/2000,
//!   Connection: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor`, rooms and broadcast primitives
//! - [`connection`] - `ConnectionActor` per WebSocket
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, Delivery};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::RoomRegistryHandle;
