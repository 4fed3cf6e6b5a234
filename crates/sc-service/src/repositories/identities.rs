//! Identity repository (read-only).
//!
//! Identities are owned by the user-management service; the coordinator
//! only reads them to authenticate connections and build eligibility
//! queues.

use super::{store_error, IdentityStore};
use crate::errors::ScError;
use crate::models::{Identity, RoleKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{IdentityId, OrganisationId};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Identity row from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct IdentityRow {
    id: Uuid,
    username: String,
    email: String,
    display_name: String,
    role: String,
    organisation_id: Uuid,
    last_login_at: Option<DateTime<Utc>>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            id: IdentityId::from(row.id),
            username: row.username,
            email: row.email,
            display_name: row.display_name,
            role: RoleKind::parse(&row.role),
            organisation_id: OrganisationId::from(row.organisation_id),
            last_login_at: row.last_login_at,
        }
    }
}

/// Postgres-backed [`IdentityStore`].
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    #[instrument(skip_all)]
    async fn find_by_login(&self, login: &str) -> Result<Option<Identity>, ScError> {
        let row: Option<IdentityRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, display_name, role, organisation_id, last_login_at
            FROM identities
            WHERE username = $1 OR email = $1
            ORDER BY (username = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find_identity_by_login"))?;

        Ok(row.map(Identity::from))
    }

    #[instrument(skip_all)]
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, ScError> {
        let row: Option<IdentityRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, display_name, role, organisation_id, last_login_at
            FROM identities
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find_identity_by_username"))?;

        Ok(row.map(Identity::from))
    }

    #[instrument(skip_all, fields(identity_id = %id))]
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, ScError> {
        let row: Option<IdentityRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, display_name, role, organisation_id, last_login_at
            FROM identities
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find_identity_by_id"))?;

        Ok(row.map(Identity::from))
    }

    #[instrument(skip_all, fields(organisation_id = %organisation_id, role = %role))]
    async fn recent_logins(
        &self,
        organisation_id: OrganisationId,
        role: RoleKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identity>, ScError> {
        let rows: Vec<IdentityRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, display_name, role, organisation_id, last_login_at
            FROM identities
            WHERE organisation_id = $1
              AND lower(role) = lower($2)
              AND last_login_at >= $3
            ORDER BY last_login_at ASC, id ASC
            "#,
        )
        .bind(*organisation_id.as_uuid())
        .bind(role.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("recent_logins"))?;

        Ok(rows.into_iter().map(Identity::from).collect())
    }
}
