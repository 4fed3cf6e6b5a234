//! Ward session repository.
//!
//! The `assignments` column is JSONB and is parsed into
//! [`WardAssignments`] once per load. A blob that does not parse is logged
//! and treated as empty, which places every non-starter as a bystander.

use super::{store_error, WardSessionStore};
use crate::errors::ScError;
use crate::models::{EndedBy, WardAssignments, WardSession, WardStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{IdentityId, WardId, WardSessionId};
use sqlx::PgPool;
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
struct WardSessionRow {
    id: Uuid,
    ward_id: Uuid,
    started_by: Uuid,
    start_time: DateTime<Utc>,
    duration_minutes: i32,
    status: String,
    assignments: serde_json::Value,
    ended_by: Option<String>,
    ended_at: Option<DateTime<Utc>>,
}

impl From<WardSessionRow> for WardSession {
    fn from(row: WardSessionRow) -> Self {
        let assignments = WardAssignments::from_json(&row.assignments).unwrap_or_else(|e| {
            warn!(
                target: "sc.ward",
                ward_session_id = %row.id,
                error = %e,
                "Malformed ward assignments, treating as empty"
            );
            WardAssignments::default()
        });

        WardSession {
            id: WardSessionId::from(row.id),
            ward_id: WardId::from(row.ward_id),
            started_by: IdentityId::from(row.started_by),
            start_time: row.start_time,
            duration_minutes: row.duration_minutes,
            status: WardStatus::parse(&row.status),
            assignments,
            ended_by: row.ended_by.as_deref().and_then(EndedBy::parse),
            ended_at: row.ended_at,
        }
    }
}

/// Postgres-backed [`WardSessionStore`].
#[derive(Debug, Clone)]
pub struct PgWardSessionStore {
    pool: PgPool,
}

impl PgWardSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WardSessionStore for PgWardSessionStore {
    #[instrument(skip_all, fields(ward_session_id = %id))]
    async fn find(&self, id: WardSessionId) -> Result<Option<WardSession>, ScError> {
        let row: Option<WardSessionRow> = sqlx::query_as(
            r#"
            SELECT id, ward_id, started_by, start_time, duration_minutes, status,
                   assignments, ended_by, ended_at
            FROM ward_sessions
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find_ward_session"))?;

        Ok(row.map(WardSession::from))
    }

    #[instrument(skip_all)]
    async fn list_active(&self) -> Result<Vec<WardSession>, ScError> {
        let rows: Vec<WardSessionRow> = sqlx::query_as(
            r#"
            SELECT id, ward_id, started_by, start_time, duration_minutes, status,
                   assignments, ended_by, ended_at
            FROM ward_sessions
            WHERE status = 'ACTIVE'
            ORDER BY start_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list_active_ward_sessions"))?;

        Ok(rows.into_iter().map(WardSession::from).collect())
    }

    #[instrument(skip_all, fields(ward_session_id = %id, ended_by = %ended_by))]
    async fn complete_if_active(
        &self,
        id: WardSessionId,
        ended_by: EndedBy,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<WardSession>, ScError> {
        let row: Option<WardSessionRow> = sqlx::query_as(
            r#"
            UPDATE ward_sessions
            SET status = 'COMPLETED', ended_by = $2, ended_at = $3
            WHERE id = $1 AND status = 'ACTIVE'
            RETURNING id, ward_id, started_by, start_time, duration_minutes, status,
                      assignments, ended_by, ended_at
            "#,
        )
        .bind(*id.as_uuid())
        .bind(ended_by.to_string())
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("complete_ward_session"))?;

        Ok(row.map(WardSession::from))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{WardRole, ZoneId};
    use serde_json::json;

    fn row(assignments: serde_json::Value, ended_by: Option<&str>) -> WardSessionRow {
        WardSessionRow {
            id: Uuid::new_v4(),
            ward_id: Uuid::new_v4(),
            started_by: Uuid::new_v4(),
            start_time: Utc::now(),
            duration_minutes: 120,
            status: "ACTIVE".to_string(),
            assignments,
            ended_by: ended_by.map(str::to_string),
            ended_at: None,
        }
    }

    #[test]
    fn test_assignments_parsed_once_on_load() {
        let nurse = Uuid::new_v4();
        let session = WardSession::from(row(
            json!({"supervisors": [], "zones": {"bay-a": nurse}}),
            None,
        ));

        assert_eq!(
            session.resolve(IdentityId::from(nurse)),
            WardRole::Zone(ZoneId::new("bay-a"))
        );
        assert!(session.is_active());
    }

    #[test]
    fn test_malformed_assignments_fall_back_to_empty() {
        let session = WardSession::from(row(json!({"zones": ["not", "a", "map"]}), None));
        assert_eq!(session.assignments, WardAssignments::default());
    }

    #[test]
    fn test_ended_by_column_parses() {
        let auto = WardSession::from(row(json!({}), Some("auto")));
        assert_eq!(auto.ended_by, Some(EndedBy::Auto));

        let starter = Uuid::new_v4();
        let manual = WardSession::from(row(json!({}), Some(&starter.to_string())));
        assert_eq!(
            manual.ended_by,
            Some(EndedBy::Identity(IdentityId::from(starter)))
        );
    }
}
