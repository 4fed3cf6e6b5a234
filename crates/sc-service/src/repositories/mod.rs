//! Repository layer for the Session Coordinator.
//!
//! The coordinator reads identities, and reads and conditionally updates
//! sessions and ward sessions. Services depend on the traits below so the
//! admission, lifecycle and ward logic can run against an in-memory fake in
//! tests; production uses the `sqlx` Postgres implementations.
//!
//! State transitions are compare-and-swap: `end_if_active` and
//! `complete_if_active` return the updated record only for the caller that
//! performed the transition, and `None` for every repeat attempt.

pub mod identities;
pub mod sessions;
pub mod ward_sessions;

use crate::errors::ScError;
use crate::models::{EndedBy, Identity, RoleKind, Session, WardSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{IdentityId, OrganisationId, SessionId, WardSessionId};

pub use identities::PgIdentityStore;
pub use sessions::PgSessionStore;
pub use ward_sessions::PgWardSessionStore;

/// Read access to the external identity records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up by username or email (the connection token).
    async fn find_by_login(&self, login: &str) -> Result<Option<Identity>, ScError>;

    /// Look up by username only (ward namespace).
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, ScError>;

    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, ScError>;

    /// Identities of `organisation_id` with `role` whose last login is at or
    /// after `since`, oldest login first.
    async fn recent_logins(
        &self,
        organisation_id: OrganisationId,
        role: RoleKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identity>, ScError>;
}

/// Clinical session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find(&self, id: SessionId) -> Result<Option<Session>, ScError>;

    async fn list_active(&self) -> Result<Vec<Session>, ScError>;

    /// Transition `active -> ended`. Returns the ended session if this call
    /// made the transition.
    async fn end_if_active(
        &self,
        id: SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, ScError>;
}

/// Ward session records.
#[async_trait]
pub trait WardSessionStore: Send + Sync {
    async fn find(&self, id: WardSessionId) -> Result<Option<WardSession>, ScError>;

    async fn list_active(&self) -> Result<Vec<WardSession>, ScError>;

    /// Transition `ACTIVE -> COMPLETED`, recording who ended it. Returns the
    /// completed ward session if this call made the transition.
    async fn complete_if_active(
        &self,
        id: WardSessionId,
        ended_by: EndedBy,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<WardSession>, ScError>;
}

/// Map a driver error to `TransientStore`, counting it against `operation`.
pub(crate) fn store_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> ScError {
    move |e| {
        crate::observability::metrics::record_store_error(operation);
        ScError::from(e)
    }
}
