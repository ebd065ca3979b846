// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Handlers for the `/v1/securt` instance and analytics entity surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use visionkit_api::LineBody;
use visionkit_control::{Direction, Line, LineKind, SecuRTInstanceWrite};
use visionkit_core::VisionKitError;

use crate::error::ApiError;
use crate::state::AppState;

/// Features accepted by the generic `POST /instance/{id}/{feature}` route.
const FEATURES: &[&str] = &[
    "input",
    "output",
    "motion_area",
    "feature_extraction",
    "attributes_extraction",
    "performance_profile",
    "face_detection",
    "lpr",
    "pip",
    "masking_areas",
    "exclusion_areas",
];

fn parse_direction(raw: Option<&str>) -> Result<Direction, ApiError> {
    match raw {
        None | Some("Both") => Ok(Direction::Both),
        Some("Up") => Ok(Direction::Up),
        Some("Down") => Ok(Direction::Down),
        Some(other) => {
            Err(VisionKitError::InvalidArgument(format!("unknown direction '{other}'")).into())
        },
    }
}

fn parse_color(raw: Option<&[u8]>) -> Result<Option<[u8; 4]>, ApiError> {
    match raw {
        None => Ok(None),
        Some([r, g, b, a]) => Ok(Some([*r, *g, *b, *a])),
        Some(_) => {
            Err(VisionKitError::InvalidArgument("color must be an RGBA tuple".to_string()).into())
        },
    }
}

fn line_from_body(kind: LineKind, body: LineBody) -> Result<Line, ApiError> {
    let direction = parse_direction(body.direction.as_deref())?;
    let color = parse_color(body.color.as_deref())?;
    Ok(Line {
        line_id: String::new(),
        kind,
        coordinates: body
            .coordinates
            .iter()
            .map(|c| visionkit_control::Point { x: c.x, y: c.y })
            .collect(),
        direction,
        classes: body.classes,
        color,
        name: body.name,
    })
}

fn parse_line_kind(raw: &str) -> Result<LineKind, ApiError> {
    LineKind::parse(raw)
        .ok_or_else(|| VisionKitError::InvalidArgument(format!("unknown line kind '{raw}'")).into())
}

// --- instance lifecycle ---

pub async fn create_instance(
    State(state): State<AppState>,
    Json(body): Json<SecuRTInstanceWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let instance = state.securt.create_instance(None, &body)?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(instance).unwrap_or_else(|_| json!({})))))
}

/// `PUT` creates with a caller-chosen id; an existing id is a conflict.
pub async fn put_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(body): Json<SecuRTInstanceWrite>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let instance = state.securt.create_instance(Some(&instance_id), &body)?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(instance).unwrap_or_else(|_| json!({})))))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let instance = state
        .securt
        .get_instance(&instance_id)
        .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;
    Ok(Json(serde_json::to_value(instance).unwrap_or_else(|_| json!({}))))
}

pub async fn patch_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Json(body): Json<SecuRTInstanceWrite>,
) -> Result<Json<Value>, ApiError> {
    let instance = state.securt.update_instance(&instance_id, &body)?;
    Ok(Json(serde_json::to_value(instance).unwrap_or_else(|_| json!({}))))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.securt.delete_instance(&instance_id)?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state
        .securt
        .get_statistics(&instance_id)
        .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_else(|_| json!({}))))
}

pub async fn get_analytics_entities(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.securt.analytics_entities(&instance_id)?))
}

// --- feature sub-endpoints ---

pub async fn apply_feature(
    State(state): State<AppState>,
    Path((instance_id, feature)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if !FEATURES.contains(&feature.as_str()) {
        return Err(VisionKitError::NotFound(format!("feature '{feature}'")).into());
    }
    state.securt.apply_feature(&instance_id, &feature, &body)?;
    Ok(Json(json!({"status": "ok"})))
}

// --- lines ---

pub async fn create_line(
    State(state): State<AppState>,
    Path((instance_id, kind)): Path<(String, String)>,
    Json(body): Json<LineBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let kind = parse_line_kind(&kind)?;
    let line = state.securt.add_line(&instance_id, line_from_body(kind, body)?)?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(line).unwrap_or_else(|_| json!({})))))
}

pub async fn get_line(
    State(state): State<AppState>,
    Path((instance_id, kind, line_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_line_kind(&kind)?;
    let line = state.securt.get_line(&instance_id, &line_id)?;
    if line.kind != kind {
        return Err(VisionKitError::NotFound(format!("line '{line_id}'")).into());
    }
    Ok(Json(serde_json::to_value(line).unwrap_or_else(|_| json!({}))))
}

/// Replaces an existing line under the same id.
pub async fn put_line(
    State(state): State<AppState>,
    Path((instance_id, kind, line_id)): Path<(String, String, String)>,
    Json(body): Json<LineBody>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_line_kind(&kind)?;
    // Replacing requires the line to exist already.
    state.securt.get_line(&instance_id, &line_id)?;
    let mut line = line_from_body(kind, body)?;
    line.line_id = line_id;
    let line = state.securt.add_line(&instance_id, line)?;
    Ok(Json(serde_json::to_value(line).unwrap_or_else(|_| json!({}))))
}

pub async fn delete_line(
    State(state): State<AppState>,
    Path((instance_id, kind, line_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    parse_line_kind(&kind)?;
    state.securt.delete_line(&instance_id, &line_id)?;
    Ok(Json(json!({"status": "ok"})))
}

/// Deletes every line of one kind.
pub async fn delete_lines_of_kind(
    State(state): State<AppState>,
    Path((instance_id, kind)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let kind = parse_line_kind(&kind)?;
    let removed = state.securt.delete_lines_of_kind(&instance_id, kind)?;
    Ok(Json(json!({"status": "ok", "removed": removed})))
}

pub async fn list_lines(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let grouped = state.securt.lines_by_kind(&instance_id)?;
    Ok(Json(serde_json::to_value(grouped).unwrap_or_else(|_| json!({}))))
}
