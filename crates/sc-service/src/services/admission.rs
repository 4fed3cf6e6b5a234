//! Admission Controller.
//!
//! Decides whether a connection may join a session room:
//!
//! 1. The session must exist and be active.
//! 2. A connection already in a different session room is rejected with
//!    `AlreadyInSession`; one already in this room is re-acknowledged.
//! 3. The creator, elevated roles and roles without a capacity entry are
//!    admitted unconditionally.
//! 4. Otherwise, under the `(session, role)` lock: count live members of
//!    the room with the requester's role; no remaining slot is
//!    `CapacityExceeded`.
//! 5. Build the eligibility queue (same organisation and role, recent
//!    login, not in any session room, oldest login first, truncated to the
//!    remaining slots). A requester outside the queue is `NotEligible`.
//!
//! The count, queue and join all happen while the lock is held, so
//! concurrent joins for one role never overshoot the limit.

use super::gatekeeper::ConnectionContext;
use crate::actors::{ConnectionSnapshot, Room, RoomRegistryHandle};
use crate::errors::{JoinRejection, ScError};
use crate::models::{Identity, RoleCapacityPolicy, RoleKind, Session};
use crate::observability::metrics;
use crate::protocol::ServerEvent;
use crate::repositories::{IdentityStore, SessionStore};
use chrono::{DateTime, Utc};
use common::types::{IdentityId, SessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument};

/// Successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The connection joined the session room.
    Admitted,
    /// The connection was already in this session room.
    AlreadyAdmitted,
}

impl Admission {
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            Admission::Admitted => "admitted",
            Admission::AlreadyAdmitted => "already_admitted",
        }
    }
}

/// Keyed async locks, one per `(session, role)`.
///
/// Entries no one holds or waits on are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct AdmissionLocks {
    locks: Mutex<HashMap<(SessionId, RoleKind), Arc<tokio::sync::Mutex<()>>>>,
}

impl AdmissionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive admission rights on `(session_id, role)`.
    pub async fn acquire(&self, session_id: SessionId, role: RoleKind) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry((session_id, role)).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Order candidates into the eligibility queue.
///
/// Keeps identities whose last login is at or after `since` and who are not
/// in `busy`, sorts by last login (oldest first, ties by id) and truncates to
/// `remaining`.
#[must_use]
pub fn eligibility_queue(
    candidates: Vec<Identity>,
    busy: &HashSet<IdentityId>,
    since: DateTime<Utc>,
    remaining: usize,
) -> Vec<IdentityId> {
    let mut queue: Vec<(DateTime<Utc>, IdentityId)> = candidates
        .into_iter()
        .filter(|identity| !busy.contains(&identity.id))
        .filter_map(|identity| {
            identity
                .last_login_at
                .filter(|login| *login >= since)
                .map(|login| (login, identity.id))
        })
        .collect();

    queue.sort();
    queue.dedup_by_key(|(_, id)| *id);
    queue.truncate(remaining);
    queue.into_iter().map(|(_, id)| id).collect()
}

/// Identities currently occupying any session room.
fn busy_identities(snapshot: &[ConnectionSnapshot]) -> HashSet<IdentityId> {
    snapshot
        .iter()
        .filter(|conn| conn.session_room().is_some())
        .map(|conn| conn.identity.id)
        .collect()
}

/// Admission controller for clinical session rooms.
#[derive(Clone)]
pub struct AdmissionController {
    sessions: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityStore>,
    registry: RoomRegistryHandle,
    policy: RoleCapacityPolicy,
    eligibility_window: chrono::Duration,
    locks: Arc<AdmissionLocks>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        identities: Arc<dyn IdentityStore>,
        registry: RoomRegistryHandle,
        policy: RoleCapacityPolicy,
        eligibility_window: chrono::Duration,
    ) -> Self {
        Self {
            sessions,
            identities,
            registry,
            policy,
            eligibility_window,
            locks: Arc::new(AdmissionLocks::new()),
        }
    }

    /// Decide and apply a join request.
    ///
    /// # Errors
    ///
    /// - `ScError::Rejected` - the request was refused; the reason goes to
    ///   the requester only
    /// - `ScError::ConnectionNotFound` - the connection closed mid-check
    /// - `ScError::TransientStore` - a store lookup failed
    #[instrument(skip_all, fields(session_id = %session_id, identity_id = %ctx.identity.id, role = %ctx.identity.role))]
    pub async fn admit(
        &self,
        ctx: &ConnectionContext,
        session_id: SessionId,
    ) -> Result<Admission, ScError> {
        let start = Instant::now();
        let result = self.decide(ctx, session_id).await;

        let outcome = match &result {
            Ok(admission) => admission.metric_label(),
            Err(ScError::Rejected(rejection)) => rejection.metric_label(),
            Err(_) => "error",
        };
        metrics::record_admission(outcome, start.elapsed());

        match &result {
            Ok(_) => debug!(
                target: "sc.admission",
                session_id = %session_id,
                connection_id = %ctx.connection_id,
                outcome,
                "Join accepted"
            ),
            Err(e) => info!(
                target: "sc.admission",
                session_id = %session_id,
                connection_id = %ctx.connection_id,
                outcome,
                error = %e,
                "Join refused"
            ),
        }
        result
    }

    async fn decide(
        &self,
        ctx: &ConnectionContext,
        session_id: SessionId,
    ) -> Result<Admission, ScError> {
        let rooms = self
            .registry
            .rooms_of(ctx.connection_id)
            .await?
            .ok_or_else(|| ScError::ConnectionNotFound(ctx.connection_id.to_string()))?;
        for room in &rooms {
            if let Room::Session(current) = room {
                if *current == session_id {
                    return Ok(Admission::AlreadyAdmitted);
                }
                return Err(ScError::Rejected(JoinRejection::AlreadyInSession));
            }
        }

        let session = self
            .sessions
            .find(session_id)
            .await?
            .ok_or(ScError::Rejected(JoinRejection::SessionNotFound))?;
        if !session.is_active() {
            return Err(ScError::Rejected(JoinRejection::SessionEnded));
        }

        let identity = &ctx.identity;
        let limit = match self.policy.limit_for(identity.role) {
            Some(limit) if identity.id != session.created_by && !identity.role.is_elevated() => {
                limit
            }
            _ => {
                self.admit_now(ctx, &session).await?;
                return Ok(Admission::Admitted);
            }
        };

        let _guard = self.locks.acquire(session_id, identity.role).await;

        let members = self.registry.members(Room::Session(session_id)).await?;
        let current = members
            .iter()
            .filter(|member| member.identity.role == identity.role)
            .count();
        let remaining = usize::try_from(limit)
            .unwrap_or(usize::MAX)
            .saturating_sub(current);
        if remaining == 0 {
            return Err(ScError::Rejected(JoinRejection::CapacityExceeded));
        }

        let since = Utc::now() - self.eligibility_window;
        let candidates = self
            .identities
            .recent_logins(identity.organisation_id, identity.role, since)
            .await?;
        let busy = busy_identities(&self.registry.snapshot().await?);
        let queue = eligibility_queue(candidates, &busy, since, remaining);

        debug!(
            target: "sc.admission",
            session_id = %session_id,
            current,
            remaining,
            queue_len = queue.len(),
            "Eligibility queue built"
        );

        if !queue.contains(&identity.id) {
            return Err(ScError::Rejected(JoinRejection::NotEligible));
        }

        self.admit_now(ctx, &session).await?;
        Ok(Admission::Admitted)
    }

    async fn admit_now(&self, ctx: &ConnectionContext, session: &Session) -> Result<(), ScError> {
        let identity = &ctx.identity;
        self.registry
            .join(ctx.connection_id, Room::Session(session.id))
            .await?;
        if identity.id == session.created_by || identity.role.is_supervisory() {
            self.registry
                .join(ctx.connection_id, Room::Supervisor(session.id))
                .await?;
        }

        self.registry
            .broadcast(
                Room::Session(session.id),
                ServerEvent::ParticipantJoined {
                    session_id: session.id,
                    identity: identity.id,
                    display_name: identity.display_name.clone(),
                    role: identity.role,
                },
                Some(ctx.connection_id),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::types::OrganisationId;

    fn candidate(login_minutes_ago: Option<i64>, now: DateTime<Utc>) -> Identity {
        Identity {
            id: IdentityId::new(),
            username: "u".to_string(),
            email: "u@example.org".to_string(),
            display_name: "U".to_string(),
            role: RoleKind::User,
            organisation_id: OrganisationId::new(),
            last_login_at: login_minutes_ago.map(|m| now - Duration::minutes(m)),
        }
    }

    #[test]
    fn test_queue_orders_oldest_login_first() {
        let now = Utc::now();
        let recent = candidate(Some(5), now);
        let older = candidate(Some(90), now);
        let oldest = candidate(Some(200), now);

        let queue = eligibility_queue(
            vec![recent.clone(), oldest.clone(), older.clone()],
            &HashSet::new(),
            now - Duration::hours(6),
            3,
        );
        assert_eq!(queue, vec![oldest.id, older.id, recent.id]);
    }

    #[test]
    fn test_queue_truncates_to_remaining() {
        let now = Utc::now();
        let a = candidate(Some(100), now);
        let b = candidate(Some(10), now);

        let queue = eligibility_queue(
            vec![a.clone(), b],
            &HashSet::new(),
            now - Duration::hours(6),
            1,
        );
        assert_eq!(queue, vec![a.id]);
    }

    #[test]
    fn test_queue_excludes_busy_and_stale() {
        let now = Utc::now();
        let busy = candidate(Some(300), now);
        let stale = candidate(Some(7 * 60), now);
        let never = candidate(None, now);
        let fresh = candidate(Some(30), now);

        let queue = eligibility_queue(
            vec![busy.clone(), stale, never, fresh.clone()],
            &HashSet::from([busy.id]),
            now - Duration::hours(6),
            5,
        );
        assert_eq!(queue, vec![fresh.id]);
    }

    #[test]
    fn test_queue_empty_when_no_slots() {
        let now = Utc::now();
        let queue = eligibility_queue(
            vec![candidate(Some(1), now)],
            &HashSet::new(),
            now - Duration::hours(6),
            0,
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_locks_serialize_same_key() {
        let locks = Arc::new(AdmissionLocks::new());
        let session = SessionId::new();

        let guard = locks.acquire(session, RoleKind::User).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(session, RoleKind::User).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // A different role is independent.
        let other = locks.acquire(session, RoleKind::Observer).await;
        drop(other);

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_locks_are_pruned_when_released() {
        let locks = AdmissionLocks::new();
        let first = SessionId::new();

        drop(locks.acquire(first, RoleKind::User).await);
        assert_eq!(locks.len(), 1);

        let _held = locks.acquire(SessionId::new(), RoleKind::User).await;
        assert_eq!(locks.len(), 1, "released entry for the first session pruned");
    }
}
