//! Pipeline run endpoints over the combined store + queue view.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use pipeline_core::Status;
use pipeline_scheduler::QueueItem;
use pipeline_store::{LogEntry, PipelineRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pipelines))
        .route("/{id}", get(get_pipeline).delete(delete_pipeline))
        .route("/{id}/logs", get(get_logs))
        .route("/{id}/logs/export", get(export_logs))
        .route("/{id}/cancel", post(cancel_pipeline))
        .route("/batch/delete", post(batch_delete))
        .route("/batch/cancel", post(batch_cancel))
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PipelineRecord> for RunSummary {
    fn from(record: &PipelineRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            status: record.status,
            started_at: Some(record.started_at),
            ended_at: record
                .succeed_at
                .or(record.failed_at)
                .or(record.cancelled_at),
            error: record.error.clone(),
        }
    }
}

impl From<&QueueItem> for RunSummary {
    fn from(item: &QueueItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            status: item.status,
            started_at: item.started_at,
            ended_at: item.ended_at,
            error: item.error.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub search: Option<String>,
    pub status: Option<Status>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Filter, sort (started_at descending, queued-but-unstarted last) and
/// paginate. Returns the post-filter total alongside the requested page.
fn filter_sort_page(mut items: Vec<RunSummary>, query: &ListQuery) -> (usize, Vec<RunSummary>) {
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        items.retain(|item| {
            item.id.to_lowercase().contains(&needle) || item.name.to_lowercase().contains(&needle)
        });
    }
    if let Some(status) = query.status {
        items.retain(|item| item.status == status);
    }
    if let Some(start) = query.start_time {
        items.retain(|item| item.started_at.is_some_and(|t| t >= start));
    }
    if let Some(end) = query.end_time {
        items.retain(|item| item.started_at.is_some_and(|t| t <= end));
    }

    items.sort_by(|a, b| match (a.started_at, b.started_at) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let total = items.len();
    let page: Vec<RunSummary> = items
        .into_iter()
        .skip(query.offset)
        .take(if query.limit > 0 { query.limit } else { usize::MAX })
        .collect();
    (total, page)
}

/// Union of store records and non-terminal queue items, keyed by run id.
fn combined_view(state: &AppState) -> Vec<RunSummary> {
    let mut by_id: HashMap<String, RunSummary> = state
        .store
        .list(0)
        .iter()
        .map(|record| (record.id.clone(), RunSummary::from(record)))
        .collect();

    if let Some(queue) = &state.queue {
        for item in queue.list() {
            if !item.status.is_terminal() {
                by_id.insert(item.id.clone(), RunSummary::from(&item));
            }
        }
    }

    by_id.into_values().collect()
}

async fn list_pipelines(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let (total, items) = filter_sort_page(combined_view(&state), &query);
    Json(json!({ "total": total, "items": items }))
}

async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineRecord>, ApiError> {
    let mut record = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {id} not found")))?;
    // Logs have their own endpoint.
    record.logs.clear();
    Ok(Json(record))
}

async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let record = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {id} not found")))?;
    Ok(Json(record.logs))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn export_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let record = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {id} not found")))?;

    match query.format.as_deref().unwrap_or("text") {
        "json" => Ok(Json(record.logs).into_response()),
        "text" => {
            let body: String = record
                .logs
                .iter()
                .map(|entry| {
                    format!(
                        "{} [{}] {}",
                        entry.timestamp.to_rfc3339(),
                        match entry.kind {
                            pipeline_store::LogKind::Stdout => "stdout",
                            pipeline_store::LogKind::Stderr => "stderr",
                            pipeline_store::LogKind::Status => "status",
                        },
                        entry.message.trim_end_matches('\n'),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok((
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response())
        }
        other => Err(ApiError::BadRequest(format!(
            "unsupported export format: {other}"
        ))),
    }
}

fn cancel_one(state: &AppState, id: &str) -> Result<(), ApiError> {
    if let Some(queue) = &state.queue {
        if queue.cancel(id) {
            return Ok(());
        }
    }

    let record = state
        .store
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {id} not found")))?;
    if record.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "pipeline {id} is already {}",
            record.status
        )));
    }

    state
        .store
        .update_status(id, Status::Cancelled, Some("cancelled by user"));
    Ok(())
}

async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    cancel_one(&state, &id)?;
    Ok(Json(json!({ "id": id, "status": "cancelled" })))
}

async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete(&id) {
        return Err(ApiError::NotFound(format!("pipeline {id} not found")));
    }
    Ok(Json(json!({ "id": id, "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    ids: Vec<String>,
}

async fn batch_delete(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Json<Value> {
    let deleted = body
        .ids
        .iter()
        .filter(|id| state.store.delete(id))
        .count();
    Json(json!({ "deleted": deleted }))
}

async fn batch_cancel(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Json<Value> {
    let cancelled = body
        .ids
        .iter()
        .filter(|id| cancel_one(&state, id).is_ok())
        .count();
    Json(json!({ "cancelled": cancelled }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(id: &str, status: Status, started_minute: Option<u32>) -> RunSummary {
        RunSummary {
            id: id.into(),
            name: format!("name-{id}"),
            status,
            started_at: started_minute
                .map(|m| Utc.with_ymd_and_hms(2026, 8, 1, 12, m, 0).unwrap()),
            ended_at: None,
            error: None,
        }
    }

    #[test]
    fn sorts_started_desc_with_unstarted_last() {
        let items = vec![
            summary("a", Status::Succeeded, Some(1)),
            summary("b", Status::Pending, None),
            summary("c", Status::Running, Some(30)),
        ];

        let (total, page) = filter_sort_page(items, &ListQuery::default());
        assert_eq!(total, 3);
        let ids: Vec<_> = page.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn filters_by_status_search_and_time() {
        let items = vec![
            summary("early", Status::Succeeded, Some(1)),
            summary("late", Status::Failed, Some(45)),
            summary("other", Status::Succeeded, Some(30)),
        ];

        let query = ListQuery {
            status: Some(Status::Succeeded),
            ..Default::default()
        };
        let (total, _) = filter_sort_page(items.clone(), &query);
        assert_eq!(total, 2);

        let query = ListQuery {
            search: Some("LATE".into()),
            ..Default::default()
        };
        let (total, page) = filter_sort_page(items.clone(), &query);
        assert_eq!(total, 1);
        assert_eq!(page[0].id, "late");

        let query = ListQuery {
            start_time: Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 20, 0).unwrap()),
            end_time: Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 40, 0).unwrap()),
            ..Default::default()
        };
        let (total, page) = filter_sort_page(items, &query);
        assert_eq!(total, 1);
        assert_eq!(page[0].id, "other");
    }

    #[test]
    fn paginates_after_filtering() {
        let items: Vec<_> = (0..10u32)
            .map(|i| summary(&format!("run-{i}"), Status::Succeeded, Some(i)))
            .collect();

        let query = ListQuery {
            limit: 3,
            offset: 2,
            ..Default::default()
        };
        let (total, page) = filter_sort_page(items, &query);
        assert_eq!(total, 10);
        assert_eq!(page.len(), 3);
        // Descending by start time: run-9 first, offset 2 lands on run-7.
        assert_eq!(page[0].id, "run-7");
    }
}
