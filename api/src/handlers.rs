use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use storage::{BlobStore, ObjectId};

use crate::{ApiError, ApiResult, Orchestrator};

fn parse_object_id(raw: &str) -> ApiResult<ObjectId> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("object id {raw:?} is not a UUID")))
}

fn parse_file_size(query: &HashMap<String, String>) -> ApiResult<u64> {
    let raw = query
        .get("fileSize")
        .ok_or_else(|| ApiError::Validation("fileSize query parameter is required".to_string()))?;
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("fileSize {raw:?} is not a byte count")))
}

// Front

pub async fn upload_file(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(object_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Body,
) -> ApiResult<Response> {
    let id = parse_object_id(&object_id)?;
    let size = parse_file_size(&query)?;

    orchestrator.upload(id, size, body.into_data_stream()).await?;

    Ok(StatusCode::OK.into_response())
}

pub async fn get_file(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(object_id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_object_id(&object_id)?;
    let stream = orchestrator.download(id).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

pub async fn health_check(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Json<serde_json::Value> {
    let nodes = orchestrator.placement().node_states().await;
    let online = nodes.iter().filter(|node| node.is_online).count();

    Json(serde_json::json!({
        "status": if online > 0 { "healthy" } else { "degraded" },
        "online_nodes": online,
        "nodes": nodes,
    }))
}

// Storage node

pub async fn upload_part(
    State(store): State<Arc<BlobStore>>,
    Path(part_name): Path<String>,
    body: Body,
) -> ApiResult<Response> {
    let written = store.put(&part_name, body.into_data_stream()).await?;

    tracing::debug!(part = %part_name, bytes = written, "Part stored");
    Ok(StatusCode::OK.into_response())
}

pub async fn get_part(
    State(store): State<Arc<BlobStore>>,
    Path(part_name): Path<String>,
) -> ApiResult<Response> {
    let blob = store.get(&part_name).await?;
    let len = blob.len();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(blob.into_stream()),
    )
        .into_response())
}

pub async fn available_space(State(store): State<Arc<BlobStore>>) -> ApiResult<Response> {
    let space = store.space_report().await?;
    Ok(Json(space).into_response())
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("no such route".to_string())
}
