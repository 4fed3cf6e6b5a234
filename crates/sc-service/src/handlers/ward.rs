//! Command handling for the ward namespace.

use super::sessions::subscribe;
use crate::errors::ScError;
use crate::protocol::ClientCommand;
use crate::routes::AppState;
use crate::services::ConnectionContext;
use tracing::instrument;

/// Handle one command from a ward connection.
///
/// # Errors
///
/// Errors are reported to the requester as an `error` event by the caller.
#[instrument(skip_all, fields(command = cmd.name(), connection_id = %ctx.connection_id))]
pub async fn handle_ward_command(
    state: &AppState,
    ctx: &ConnectionContext,
    cmd: ClientCommand,
) -> Result<(), ScError> {
    match cmd {
        ClientCommand::Rejoin => {
            state.ward.rejoin(ctx).await?;
            Ok(())
        }
        ClientCommand::WardUpdate {
            ward_session_id,
            zone,
            payload,
        } => {
            state
                .ward
                .route_update(ctx, ward_session_id, zone, payload)
                .await?;
            Ok(())
        }
        ClientCommand::EndWardSession { ward_session_id } => {
            state.ward.end(ctx, ward_session_id).await?;
            Ok(())
        }
        ClientCommand::Subscribe { topic_id } => {
            subscribe(state.ward_registry(), ctx, topic_id).await
        }
        other => Err(ScError::BadRequest(format!(
            "{} is not supported on the ward endpoint",
            other.name()
        ))),
    }
}
