//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name                  | Description                                | Return Type                    |
// |-----------------------|--------------------------------------------|--------------------------------|
// | health                | Liveness and live session count            | Json<HealthResponse>           |
// | publish_event         | Publish an event to the broker             | ApiResult<Json<PublishEventResponse>> |
//--------------------------------------------------------------------------------------------------

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::Extension};
use tracing::debug;

use super::{ApiError, ApiResult, AppState, HealthResponse, PublishEventRequest, PublishEventResponse};

/// Health check endpoint
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        sessions: state.hub.session_count(),
    })
}

/// Publish an event to the broker
///
/// The body is decoded here rather than through the `Json` extractor so every
/// malformed request is answered with 400 in the API error shape.
pub async fn publish_event(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<PublishEventResponse>> {
    let request: PublishEventRequest = serde_json::from_slice(&body)?;
    if request.event_type.is_empty() {
        return Err(ApiError::BadRequest("event_type is required".to_owned()));
    }
    debug!("publishing {}", request.event_type);

    let routing_key = state
        .publisher
        .publish(&request.event_type, &request.payload)
        .await?;

    Ok(Json(PublishEventResponse::published(
        &request.event_type,
        routing_key,
    )))
}
