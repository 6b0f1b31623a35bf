//! Pipeline config conversion endpoints.

use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/convert/yaml-to-visual", post(yaml_to_visual))
        .route("/convert/visual-to-yaml", post(visual_to_yaml))
}

#[derive(Debug, Deserialize)]
struct YamlBody {
    yaml: String,
}

#[derive(Debug, Deserialize)]
struct VisualBody {
    visual: Value,
}

async fn yaml_to_visual(Json(body): Json<YamlBody>) -> Result<Json<Value>, ApiError> {
    let visual = pipeline_config::yaml_to_visual(&body.yaml)?;
    Ok(Json(json!({ "visual": visual })))
}

async fn visual_to_yaml(Json(body): Json<VisualBody>) -> Result<Json<Value>, ApiError> {
    let yaml = pipeline_config::visual_to_yaml(&body.visual)?;
    Ok(Json(json!({ "yaml": yaml })))
}
