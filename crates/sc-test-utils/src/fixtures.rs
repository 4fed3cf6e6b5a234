//! Builders for coordinator test data.

use chrono::{DateTime, Duration, Utc};
use common::types::{IdentityId, OrganisationId, SessionId, WardId, WardSessionId};
use sc_service::models::{
    Identity, RoleKind, Session, SessionState, WardAssignments, WardSession, WardStatus, ZoneId,
};

/// Identity builder. Defaults: role `User`, a fresh organisation, last
/// login one minute ago.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    identity: Identity,
}

impl TestIdentity {
    #[must_use]
    pub fn new(username: &str) -> Self {
        Self {
            identity: Identity {
                id: IdentityId::new(),
                username: username.to_string(),
                email: format!("{username}@example.org"),
                display_name: username.to_string(),
                role: RoleKind::User,
                organisation_id: OrganisationId::new(),
                last_login_at: Some(Utc::now() - Duration::minutes(1)),
            },
        }
    }

    #[must_use]
    pub fn role(mut self, role: RoleKind) -> Self {
        self.identity.role = role;
        self
    }

    #[must_use]
    pub fn organisation(mut self, organisation_id: OrganisationId) -> Self {
        self.identity.organisation_id = organisation_id;
        self
    }

    #[must_use]
    pub fn display_name(mut self, display_name: &str) -> Self {
        self.identity.display_name = display_name.to_string();
        self
    }

    #[must_use]
    pub fn logged_in_at(mut self, at: DateTime<Utc>) -> Self {
        self.identity.last_login_at = Some(at);
        self
    }

    #[must_use]
    pub fn never_logged_in(mut self) -> Self {
        self.identity.last_login_at = None;
        self
    }

    #[must_use]
    pub fn build(self) -> Identity {
        self.identity
    }
}

/// Session builder. Defaults: active, started now, 60 minutes.
#[derive(Debug, Clone)]
pub struct TestSession {
    session: Session,
}

impl TestSession {
    #[must_use]
    pub fn new(organisation_id: OrganisationId, created_by: IdentityId) -> Self {
        Self {
            session: Session {
                id: SessionId::new(),
                organisation_id,
                created_by,
                start_time: Utc::now(),
                duration_minutes: 60,
                state: SessionState::Active,
                end_time: None,
            },
        }
    }

    #[must_use]
    pub fn started_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.session.start_time = start_time;
        self
    }

    #[must_use]
    pub fn duration_minutes(mut self, minutes: i32) -> Self {
        self.session.duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn ended(mut self) -> Self {
        self.session.state = SessionState::Ended;
        self.session.end_time = Some(Utc::now());
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        self.session
    }
}

/// Ward session builder. Defaults: ACTIVE, started now, 60 minutes, no
/// assignments.
#[derive(Debug, Clone)]
pub struct TestWardSession {
    ward_session: WardSession,
}

impl TestWardSession {
    #[must_use]
    pub fn new(started_by: IdentityId) -> Self {
        Self {
            ward_session: WardSession {
                id: WardSessionId::new(),
                ward_id: WardId::new(),
                started_by,
                start_time: Utc::now(),
                duration_minutes: 60,
                status: WardStatus::Active,
                assignments: WardAssignments::default(),
                ended_by: None,
                ended_at: None,
            },
        }
    }

    #[must_use]
    pub fn supervisor(mut self, identity: IdentityId) -> Self {
        self.ward_session.assignments.supervisors.insert(identity);
        self
    }

    #[must_use]
    pub fn zone(mut self, zone: &str, occupant: IdentityId) -> Self {
        self.ward_session
            .assignments
            .zones
            .insert(ZoneId::new(zone), occupant);
        self
    }

    #[must_use]
    pub fn started_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.ward_session.start_time = start_time;
        self
    }

    #[must_use]
    pub fn duration_minutes(mut self, minutes: i32) -> Self {
        self.ward_session.duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn build(self) -> WardSession {
        self.ward_session
    }
}
