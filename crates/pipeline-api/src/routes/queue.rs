//! Queue inspection endpoints.

use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use pipeline_scheduler::{QueueItem, QueueStats};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queue))
        .route("/stats", get(stats))
        .route("/{id}", delete(cancel_item))
}

async fn list_queue(State(state): State<AppState>) -> Result<Json<Vec<QueueItem>>, ApiError> {
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("queue is not configured".into()))?;
    Ok(Json(queue.list()))
}

async fn stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("queue is not configured".into()))?;
    Ok(Json(queue.stats()))
}

async fn cancel_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let queue = state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("queue is not configured".into()))?;

    let Some(item) = queue.get(&id) else {
        return Err(ApiError::NotFound(format!("queue item {id} not found")));
    };
    if !queue.cancel(&id) {
        return Err(ApiError::BadRequest(format!(
            "queue item {id} is already {}",
            item.status
        )));
    }

    Ok(Json(json!({ "id": id, "status": "cancelled" })))
}
