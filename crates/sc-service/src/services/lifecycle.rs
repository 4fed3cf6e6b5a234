//! Session lifecycle: explicit end and scheduled expiry.
//!
//! Both paths use the store's conditional `active -> ended` update; only the
//! caller that performs the transition broadcasts `sessionEnded`, so
//! repeated or concurrent attempts never produce a duplicate.
//!
//! The closure reaches the organisation room of the session's creator and
//! the session room itself, deduplicated per connection. The session and
//! supervisor rooms are then cleared.

use super::gatekeeper::ConnectionContext;
use crate::actors::{Room, RoomRegistryHandle};
use crate::errors::ScError;
use crate::models::Session;
use crate::observability::metrics;
use crate::protocol::{EndReason, ServerEvent};
use crate::repositories::{IdentityStore, SessionStore};
use chrono::{DateTime, Utc};
use common::types::{OrganisationId, SessionId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct LifecycleCoordinator {
    sessions: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityStore>,
    registry: RoomRegistryHandle,
}

impl LifecycleCoordinator {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityStore>,
        registry: RoomRegistryHandle,
    ) -> Self {
        Self {
            sessions,
            identities,
            registry,
        }
    }

    /// End a session on request of its creator or an admin.
    ///
    /// Returns true if this call ended the session; false if it had already
    /// ended or does not exist (no broadcast).
    ///
    /// # Errors
    ///
    /// - `ScError::PermissionDenied` - requester is neither creator nor admin
    #[instrument(skip_all, fields(session_id = %session_id, identity_id = %requester.identity.id))]
    pub async fn end_session(
        &self,
        requester: &ConnectionContext,
        session_id: SessionId,
    ) -> Result<bool, ScError> {
        let Some(session) = self.sessions.find(session_id).await? else {
            info!(
                target: "sc.lifecycle",
                session_id = %session_id,
                "End requested for unknown session, nothing to do"
            );
            return Ok(false);
        };

        let identity = &requester.identity;
        if identity.id != session.created_by && !identity.role.is_elevated() {
            return Err(ScError::PermissionDenied(
                "only the creator or an admin may end a session".to_string(),
            ));
        }

        match self.sessions.end_if_active(session_id, Utc::now()).await? {
            Some(ended) => {
                info!(
                    target: "sc.lifecycle",
                    session_id = %session_id,
                    "Session ended by request"
                );
                self.announce_end(&ended, EndReason::Ended).await?;
                Ok(true)
            }
            None => {
                debug!(
                    target: "sc.lifecycle",
                    session_id = %session_id,
                    "Session already ended, nothing to do"
                );
                Ok(false)
            }
        }
    }

    /// End every active session whose scheduled end is at or before `now`.
    ///
    /// A failed transition is logged and retried on the next tick. A failed
    /// announcement is only logged: the session has already ended. Returns
    /// the number of sessions ended.
    ///
    /// # Errors
    ///
    /// Returns `ScError::TransientStore` only if the active list itself
    /// cannot be loaded.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize, ScError> {
        let active = self.sessions.list_active().await?;
        let mut expired = 0;

        for session in active.iter().filter(|session| session.is_expired(now)) {
            match self.sessions.end_if_active(session.id, now).await {
                Ok(Some(ended)) => {
                    info!(
                        target: "sc.task.session_expiry",
                        session_id = %ended.id,
                        expires_at = %ended.expires_at(),
                        "Session expired"
                    );
                    metrics::record_session_expired("session");
                    expired += 1;
                    if let Err(e) = self.announce_end(&ended, EndReason::Expired).await {
                        warn!(
                            target: "sc.task.session_expiry",
                            session_id = %ended.id,
                            error = %e,
                            "Failed to announce session expiry"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        target: "sc.task.session_expiry",
                        session_id = %session.id,
                        error = %e,
                        "Failed to expire session, will retry next tick"
                    );
                }
            }
        }
        Ok(expired)
    }

    /// Organisation room of the session's creator; falls back to the
    /// session's own organisation if the creator cannot be loaded.
    async fn creator_organisation(&self, session: &Session) -> OrganisationId {
        match self.identities.find_by_id(session.created_by).await {
            Ok(Some(creator)) => creator.organisation_id,
            Ok(None) => {
                warn!(
                    target: "sc.lifecycle",
                    session_id = %session.id,
                    "Session creator not found, using session organisation"
                );
                session.organisation_id
            }
            Err(e) => {
                warn!(
                    target: "sc.lifecycle",
                    session_id = %session.id,
                    error = %e,
                    "Creator lookup failed, using session organisation"
                );
                session.organisation_id
            }
        }
    }

    async fn announce_end(&self, session: &Session, reason: EndReason) -> Result<(), ScError> {
        let organisation_id = self.creator_organisation(session).await;
        let delivered = self
            .registry
            .broadcast_many(
                vec![Room::Organisation(organisation_id), Room::Session(session.id)],
                ServerEvent::SessionEnded {
                    session_id: session.id,
                    reason,
                },
                None,
            )
            .await?;

        let mut occupants = BTreeSet::new();
        for room in [Room::Session(session.id), Room::Supervisor(session.id)] {
            occupants.extend(
                self.registry
                    .members(room)
                    .await?
                    .into_iter()
                    .map(|member| member.connection_id),
            );
        }
        for connection_id in occupants {
            self.registry
                .leave(connection_id, Room::Session(session.id))
                .await?;
            self.registry
                .leave(connection_id, Room::Supervisor(session.id))
                .await?;
        }

        debug!(
            target: "sc.lifecycle",
            session_id = %session.id,
            reason = reason.as_str(),
            delivered,
            "Session closure broadcast"
        );
        Ok(())
    }
}
