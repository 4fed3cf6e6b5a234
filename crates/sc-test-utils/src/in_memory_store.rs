//! In-memory store for coordinator tests.
//!
//! One `InMemoryStore` implements all three store traits over a shared map,
//! so a test can seed records, run the coordinator, then inspect what the
//! coordinator wrote.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = InMemoryStore::new();
//! let session = store.add_session(TestSession::new(org, creator).build());
//!
//! store.fail_reads(true);
//! // list_active / find now return TransientStore errors
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{IdentityId, OrganisationId, SessionId, WardSessionId};
use sc_service::errors::ScError;
use sc_service::models::{
    EndedBy, Identity, RoleKind, Session, SessionState, WardSession, WardStatus,
};
use sc_service::repositories::{IdentityStore, SessionStore, WardSessionStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    identities: HashMap<IdentityId, Identity>,
    sessions: HashMap<SessionId, Session>,
    ward_sessions: HashMap<WardSessionId, WardSession>,
    fail_reads: bool,
    /// Sessions whose conditional update fails.
    failing_sessions: HashSet<SessionId>,
    session_transitions: usize,
    ward_transitions: usize,
}

/// In-memory implementation of every coordinator store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an identity and return it.
    pub fn add_identity(&self, identity: Identity) -> Identity {
        let mut inner = self.inner.lock().unwrap();
        inner.identities.insert(identity.id, identity.clone());
        identity
    }

    /// Insert a session and return it.
    pub fn add_session(&self, session: Session) -> Session {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.insert(session.id, session.clone());
        session
    }

    /// Insert (or replace) a ward session and return it.
    pub fn add_ward_session(&self, ward_session: WardSession) -> WardSession {
        let mut inner = self.inner.lock().unwrap();
        inner
            .ward_sessions
            .insert(ward_session.id, ward_session.clone());
        ward_session
    }

    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn ward_session(&self, id: WardSessionId) -> Option<WardSession> {
        self.inner.lock().unwrap().ward_sessions.get(&id).cloned()
    }

    /// Make every read fail with `TransientStore` until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().unwrap().fail_reads = fail;
    }

    /// Make the conditional update of one session fail.
    pub fn fail_end_of(&self, id: SessionId) {
        self.inner.lock().unwrap().failing_sessions.insert(id);
    }

    /// Number of successful `active -> ended` transitions.
    pub fn session_transitions(&self) -> usize {
        self.inner.lock().unwrap().session_transitions
    }

    /// Number of successful `ACTIVE -> COMPLETED` transitions.
    pub fn ward_transitions(&self) -> usize {
        self.inner.lock().unwrap().ward_transitions
    }

    fn check_reads(inner: &Inner) -> Result<(), ScError> {
        if inner.fail_reads {
            return Err(ScError::TransientStore("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<Identity>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner
            .identities
            .values()
            .find(|identity| identity.username == login || identity.email == login)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner
            .identities
            .values()
            .find(|identity| identity.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner.identities.get(&id).cloned())
    }

    async fn recent_logins(
        &self,
        organisation_id: OrganisationId,
        role: RoleKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identity>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        let mut found: Vec<Identity> = inner
            .identities
            .values()
            .filter(|identity| identity.organisation_id == organisation_id)
            .filter(|identity| identity.role == role)
            .filter(|identity| identity.last_login_at.is_some_and(|login| login >= since))
            .cloned()
            .collect();
        found.sort_by_key(|identity| identity.last_login_at);
        Ok(found)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn find(&self, id: SessionId) -> Result<Option<Session>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Session>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner
            .sessions
            .values()
            .filter(|session| session.is_active())
            .cloned()
            .collect())
    }

    async fn end_if_active(
        &self,
        id: SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, ScError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_sessions.contains(&id) {
            return Err(ScError::TransientStore("injected update failure".to_string()));
        }

        let Some(session) = inner.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !session.is_active() {
            return Ok(None);
        }
        session.state = SessionState::Ended;
        session.end_time = Some(ended_at);
        let ended = session.clone();
        inner.session_transitions += 1;
        Ok(Some(ended))
    }
}

#[async_trait]
impl WardSessionStore for InMemoryStore {
    async fn find(&self, id: WardSessionId) -> Result<Option<WardSession>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner.ward_sessions.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<WardSession>, ScError> {
        let inner = self.inner.lock().unwrap();
        Self::check_reads(&inner)?;
        Ok(inner
            .ward_sessions
            .values()
            .filter(|ward_session| ward_session.is_active())
            .cloned()
            .collect())
    }

    async fn complete_if_active(
        &self,
        id: WardSessionId,
        ended_by: EndedBy,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<WardSession>, ScError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(ward_session) = inner.ward_sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !ward_session.is_active() {
            return Ok(None);
        }
        ward_session.status = WardStatus::Completed;
        ward_session.ended_by = Some(ended_by);
        ward_session.ended_at = Some(ended_at);
        let completed = ward_session.clone();
        inner.ward_transitions += 1;
        Ok(Some(completed))
    }
}
