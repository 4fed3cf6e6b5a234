//! Session repository.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - `end_if_active` is a single conditional `UPDATE ... RETURNING`, so two
//!   concurrent enders (scheduler and creator) cannot both observe the
//!   transition

use super::{store_error, SessionStore};
use crate::errors::ScError;
use crate::models::{Session, SessionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{IdentityId, OrganisationId, SessionId};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    organisation_id: Uuid,
    created_by: Uuid,
    start_time: DateTime<Utc>,
    duration_minutes: i32,
    state: String,
    end_time: Option<DateTime<Utc>>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: SessionId::from(row.id),
            organisation_id: OrganisationId::from(row.organisation_id),
            created_by: IdentityId::from(row.created_by),
            start_time: row.start_time,
            duration_minutes: row.duration_minutes,
            state: SessionState::parse(&row.state),
            end_time: row.end_time,
        }
    }
}

/// Postgres-backed [`SessionStore`].
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip_all, fields(session_id = %id))]
    async fn find(&self, id: SessionId) -> Result<Option<Session>, ScError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, organisation_id, created_by, start_time, duration_minutes, state, end_time
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find_session"))?;

        Ok(row.map(Session::from))
    }

    #[instrument(skip_all)]
    async fn list_active(&self) -> Result<Vec<Session>, ScError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, organisation_id, created_by, start_time, duration_minutes, state, end_time
            FROM sessions
            WHERE state = 'active'
            ORDER BY start_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list_active_sessions"))?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn end_if_active(
        &self,
        id: SessionId,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>, ScError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            UPDATE sessions
            SET state = 'ended', end_time = $2
            WHERE id = $1 AND state = 'active'
            RETURNING id, organisation_id, created_by, start_time, duration_minutes, state, end_time
            "#,
        )
        .bind(*id.as_uuid())
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("end_session"))?;

        Ok(row.map(Session::from))
    }
}
