//! Domain models for the Session Coordinator.
//!
//! Durable records (`Session`, `WardSession`) and the externally owned
//! `Identity` are loaded through the store traits in
//! [`crate::repositories`]. Ward assignments arrive as a JSON blob and are
//! parsed once per load into [`WardAssignments`].

use chrono::{DateTime, Utc};
use common::types::{IdentityId, OrganisationId, SessionId, WardId, WardSessionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Closed set of identity roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoleKind {
    Admin,
    Faculty,
    Observer,
    User,
    Other,
}

impl RoleKind {
    /// Returns the role as stored and serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Admin => "Admin",
            RoleKind::Faculty => "Faculty",
            RoleKind::Observer => "Observer",
            RoleKind::User => "User",
            RoleKind::Other => "Other",
        }
    }

    /// Parse a stored role string. Unknown values map to `Other`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => RoleKind::Admin,
            "faculty" => RoleKind::Faculty,
            "observer" => RoleKind::Observer,
            "user" => RoleKind::User,
            _ => RoleKind::Other,
        }
    }

    /// Elevated roles bypass capacity and eligibility checks.
    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, RoleKind::Admin)
    }

    /// Supervisory roles also join a session's supervisor room.
    #[must_use]
    pub const fn is_supervisory(&self) -> bool {
        matches!(self, RoleKind::Admin | RoleKind::Faculty | RoleKind::Observer)
    }

    /// Roles allowed to remove other participants from a session.
    #[must_use]
    pub const fn can_remove_participants(&self) -> bool {
        matches!(self, RoleKind::Admin | RoleKind::Faculty)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity (read-only, owned by the identity service).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub role: RoleKind,
    pub organisation_id: OrganisationId,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Durable session state. Transitions only `Active -> Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Ended,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Ended => "ended",
        }
    }

    /// Parse a stored state. Anything that is not `active` is treated as
    /// ended so that unknown rows are never admitted into.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("active") {
            SessionState::Active
        } else {
            SessionState::Ended
        }
    }
}

/// A clinical training session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub organisation_id: OrganisationId,
    pub created_by: IdentityId,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub state: SessionState,
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    /// Scheduled end of the session.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whether the session is past its scheduled end at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// Durable ward session status. Transitions only `Active -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WardStatus {
    Active,
    Completed,
}

impl WardStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            WardStatus::Active => "ACTIVE",
            WardStatus::Completed => "COMPLETED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("active") {
            WardStatus::Active
        } else {
            WardStatus::Completed
        }
    }
}

/// Named zone within a ward session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed view of a ward session's assignments blob.
///
/// Stored shape: `{"supervisors": [uuid, ...], "zones": {"<zone>": uuid}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardAssignments {
    #[serde(default)]
    pub supervisors: BTreeSet<IdentityId>,
    #[serde(default)]
    pub zones: BTreeMap<ZoneId, IdentityId>,
}

/// How a connection is placed within a ward session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WardRole {
    /// Starter or listed supervisor: base room + supervisor room.
    Supervisor,
    /// Listed under a zone: base room + that zone's room.
    Zone(ZoneId),
    /// Not assigned. Joins nothing until assignments change and the client
    /// re-joins.
    Bystander,
}

impl WardAssignments {
    /// Parse the stored JSON blob.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Serialize back to the stored JSON shape.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Resolve an identity's placement.
    ///
    /// Supervisor status wins over any zone listing, so a connection is
    /// never both. An identity listed under several zones takes the first
    /// in zone order.
    #[must_use]
    pub fn resolve(&self, identity: IdentityId, started_by: IdentityId) -> WardRole {
        if identity == started_by || self.supervisors.contains(&identity) {
            return WardRole::Supervisor;
        }
        self.zones
            .iter()
            .find(|(_, occupant)| **occupant == identity)
            .map_or(WardRole::Bystander, |(zone, _)| WardRole::Zone(zone.clone()))
    }
}

/// Who ended a ward session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndedBy {
    Identity(IdentityId),
    /// Ended by the expiry scheduler. Stored as the literal `"auto"`.
    Auto,
}

impl EndedBy {
    pub const AUTO: &'static str = "auto";

    /// Parse the stored column value.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        if value == Self::AUTO {
            return Some(EndedBy::Auto);
        }
        value.parse().ok().map(EndedBy::Identity)
    }
}

impl fmt::Display for EndedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndedBy::Identity(id) => fmt::Display::fmt(id, f),
            EndedBy::Auto => f.write_str(Self::AUTO),
        }
    }
}

impl Serialize for EndedBy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EndedBy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        EndedBy::parse(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid endedBy value: {value}")))
    }
}

/// A facility-wide ward session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardSession {
    pub id: WardSessionId,
    pub ward_id: WardId,
    pub started_by: IdentityId,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: WardStatus,
    pub assignments: WardAssignments,
    pub ended_by: Option<EndedBy>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WardSession {
    #[must_use]
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.start_time + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Whether the session is past `startTime + duration + grace` at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        now >= self.scheduled_end() + grace
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == WardStatus::Active
    }

    /// Placement of `identity` in this ward session.
    #[must_use]
    pub fn resolve(&self, identity: IdentityId) -> WardRole {
        self.assignments.resolve(identity, self.started_by)
    }
}

/// Maximum concurrent connections per role per session.
///
/// Roles without an entry are unrestricted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCapacityPolicy {
    limits: HashMap<RoleKind, u32>,
}

impl Default for RoleCapacityPolicy {
    /// User: 3, Observer: 1, Faculty: 1.
    fn default() -> Self {
        Self::unrestricted()
            .with_limit(RoleKind::User, 3)
            .with_limit(RoleKind::Observer, 1)
            .with_limit(RoleKind::Faculty, 1)
    }
}

impl RoleCapacityPolicy {
    /// A policy with no limits at all.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            limits: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, role: RoleKind, limit: u32) -> Self {
        self.limits.insert(role, limit);
        self
    }

    #[must_use]
    pub fn limit_for(&self, role: RoleKind) -> Option<u32> {
        self.limits.get(&role).copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_role_parse() {
        assert_eq!(RoleKind::parse("Admin"), RoleKind::Admin);
        assert_eq!(RoleKind::parse("faculty"), RoleKind::Faculty);
        assert_eq!(RoleKind::parse(" OBSERVER "), RoleKind::Observer);
        assert_eq!(RoleKind::parse("User"), RoleKind::User);
        assert_eq!(RoleKind::parse("Nurse"), RoleKind::Other);
    }

    #[test]
    fn test_role_capabilities() {
        assert!(RoleKind::Admin.is_elevated());
        assert!(!RoleKind::Faculty.is_elevated());
        assert!(RoleKind::Faculty.is_supervisory());
        assert!(RoleKind::Observer.is_supervisory());
        assert!(!RoleKind::User.is_supervisory());
        assert!(RoleKind::Faculty.can_remove_participants());
        assert!(!RoleKind::Observer.can_remove_participants());
    }

    #[test]
    fn test_session_expiry_boundary() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let session = Session {
            id: SessionId::new(),
            organisation_id: OrganisationId::new(),
            created_by: IdentityId::new(),
            start_time: start,
            duration_minutes: 30,
            state: SessionState::Active,
            end_time: None,
        };

        assert!(!session.is_expired(start + chrono::Duration::minutes(29)));
        assert!(session.is_expired(start + chrono::Duration::minutes(30)));
    }

    #[test]
    fn test_ward_overdue_includes_grace() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let ward = WardSession {
            id: WardSessionId::new(),
            ward_id: WardId::new(),
            started_by: IdentityId::new(),
            start_time: start,
            duration_minutes: 60,
            status: WardStatus::Active,
            assignments: WardAssignments::default(),
            ended_by: None,
            ended_at: None,
        };
        let grace = chrono::Duration::seconds(60);

        assert!(!ward.is_overdue(start + chrono::Duration::minutes(60), grace));
        assert!(ward.is_overdue(start + chrono::Duration::minutes(61), grace));
    }

    #[test]
    fn test_assignments_parse_and_resolve() {
        let starter = IdentityId::new();
        let supervisor = IdentityId::new();
        let occupant = IdentityId::new();
        let json = serde_json::json!({
            "supervisors": [supervisor],
            "zones": { "bay-a": occupant, "bay-b": supervisor }
        });

        let assignments = WardAssignments::from_json(&json).unwrap();

        assert_eq!(assignments.resolve(starter, starter), WardRole::Supervisor);
        // Listed as supervisor and under a zone: supervisor wins.
        assert_eq!(assignments.resolve(supervisor, starter), WardRole::Supervisor);
        assert_eq!(
            assignments.resolve(occupant, starter),
            WardRole::Zone(ZoneId::new("bay-a"))
        );
        assert_eq!(
            assignments.resolve(IdentityId::new(), starter),
            WardRole::Bystander
        );
    }

    #[test]
    fn test_assignments_missing_fields_default() {
        let assignments = WardAssignments::from_json(&serde_json::json!({})).unwrap();
        assert!(assignments.supervisors.is_empty());
        assert!(assignments.zones.is_empty());

        assert!(WardAssignments::from_json(&serde_json::json!({"zones": 7})).is_err());
    }

    #[test]
    fn test_ended_by_round_trip_through_column() {
        let id = IdentityId::new();
        assert_eq!(EndedBy::parse("auto"), Some(EndedBy::Auto));
        assert_eq!(EndedBy::parse(&id.to_string()), Some(EndedBy::Identity(id)));
        assert_eq!(EndedBy::parse("someone"), None);

        assert_eq!(serde_json::to_string(&EndedBy::Auto).unwrap(), "\"auto\"");
    }

    #[test]
    fn test_default_capacity_policy() {
        let policy = RoleCapacityPolicy::default();
        assert_eq!(policy.limit_for(RoleKind::User), Some(3));
        assert_eq!(policy.limit_for(RoleKind::Observer), Some(1));
        assert_eq!(policy.limit_for(RoleKind::Faculty), Some(1));
        assert_eq!(policy.limit_for(RoleKind::Admin), None);
    }
}
