//! Internal entity update feed.
//!
//! `POST /internal/topics/{topic_id}` with a JSON body publishes a
//! `topicUpdate` to every subscriber of the topic in both namespaces. Meant
//! for the CRUD services inside the cluster; it is not exposed publicly.

use crate::actors::Room;
use crate::errors::ScError;
use crate::protocol::ServerEvent;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Publish result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Connections the update was queued for.
    pub delivered: usize,
}

#[instrument(skip_all, fields(topic_id = %topic_id))]
pub async fn publish_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<PublishResponse>, ScError> {
    let event = ServerEvent::TopicUpdate {
        topic_id: topic_id.clone(),
        payload,
    };

    let mut delivered = 0;
    for registry in [state.session_registry(), state.ward_registry()] {
        delivered += registry
            .broadcast(Room::Topic(topic_id.clone()), event.clone(), None)
            .await?;
    }

    debug!(
        target: "sc.topics",
        topic_id = %topic_id,
        delivered,
        "Topic update published"
    );
    Ok(Json(PublishResponse { delivered }))
}
