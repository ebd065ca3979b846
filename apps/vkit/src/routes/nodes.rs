// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Handlers for the `/v1/core/nodes` node pool surface.
//!
//! The listing falls back to templates (marked `type: "templates"`, each
//! element `isTemplate: true`) while no pre-configured nodes exist.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::SystemTime;
use time::format_description::well_known::Rfc3339;
use visionkit_api::{CreateNodeBody, NodeListing, UpdateNodeBody};
use visionkit_core::node::NodeCategory;
use visionkit_core::{NodeTemplate, PreConfiguredNode, VisionKitError};

use crate::error::ApiError;
use crate::state::AppState;

fn system_time_to_rfc3339(time: SystemTime) -> String {
    time::OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn node_to_json(node: &PreConfiguredNode) -> Value {
    json!({
        "nodeId": node.node_id,
        "templateId": node.template_id,
        "parameters": node.parameters,
        "inUse": node.in_use,
        "createdAt": system_time_to_rfc3339(node.created_at),
    })
}

fn template_to_json(template: &NodeTemplate) -> Value {
    let mut value = serde_json::to_value(template).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert("isTemplate".to_string(), json!(true));
    }
    value
}

fn persist(state: &AppState) {
    if let Err(e) = state.storage.save_from(&state.pool) {
        tracing::warn!(error = %e, "Failed to persist node pool snapshot");
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(rename = "type", default)]
    pub listing_type: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<NodeListing>, ApiError> {
    let want_templates = query.listing_type.as_deref() == Some("templates");

    if want_templates || state.pool.node_count() == 0 {
        let mut templates = state.pool.templates();
        if let Some(category) = &query.category {
            let category = NodeCategory::parse(category).ok_or_else(|| {
                VisionKitError::InvalidArgument(format!("unknown category '{category}'"))
            })?;
            templates.retain(|t| t.category == category);
        }
        let nodes: Vec<Value> = templates.iter().map(template_to_json).collect();
        return Ok(Json(NodeListing {
            listing_type: "templates".to_string(),
            total: nodes.len(),
            nodes,
        }));
    }

    let mut nodes = if query.available == Some(true) {
        state.pool.available()
    } else {
        state.pool.list()
    };
    if let Some(category) = &query.category {
        let category = NodeCategory::parse(category).ok_or_else(|| {
            VisionKitError::InvalidArgument(format!("unknown category '{category}'"))
        })?;
        nodes.retain(|n| {
            state
                .pool
                .get_template(&n.template_id)
                .is_some_and(|t| t.category == category)
        });
    }

    let nodes: Vec<Value> = nodes.iter().map(node_to_json).collect();
    Ok(Json(NodeListing { listing_type: "nodes".to_string(), total: nodes.len(), nodes }))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateNodeBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let node_id = state.pool.create(&body.template_id, body.parameters)?;
    persist(&state);
    let node = state
        .pool
        .get(&node_id)
        .ok_or_else(|| VisionKitError::Internal("node vanished after create".to_string()))?;
    Ok((StatusCode::CREATED, Json(node_to_json(&node))))
}

pub async fn get(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let node = state
        .pool
        .get(&node_id)
        .ok_or_else(|| VisionKitError::NotFound(format!("node '{node_id}'")))?;
    Ok(Json(node_to_json(&node)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(body): Json<UpdateNodeBody>,
) -> Result<Json<Value>, ApiError> {
    if !body.parameters.is_empty() {
        state.pool.update_parameters(&node_id, body.parameters)?;
    }
    if let Some(in_use) = body.in_use {
        let flipped = if in_use {
            state.pool.mark_in_use(&node_id)
        } else {
            state.pool.mark_available(&node_id)
        };
        if !flipped {
            return Err(VisionKitError::Conflict(format!(
                "node '{node_id}' is already {}",
                if in_use { "in use" } else { "available" }
            ))
            .into());
        }
    }
    persist(&state);
    let node = state
        .pool
        .get(&node_id)
        .ok_or_else(|| VisionKitError::NotFound(format!("node '{node_id}'")))?;
    Ok(Json(node_to_json(&node)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let Some(node) = state.pool.get(&node_id) else {
        return Err(VisionKitError::NotFound(format!("node '{node_id}'")).into());
    };
    if node.in_use {
        return Err(VisionKitError::Conflict(format!("node '{node_id}' is in use")).into());
    }
    state.pool.remove(&node_id);
    persist(&state);
    Ok(Json(json!({"status": "ok"})))
}

pub async fn list_templates(State(state): State<AppState>) -> Json<NodeListing> {
    let nodes: Vec<Value> = state.pool.templates().iter().map(template_to_json).collect();
    Json(NodeListing { listing_type: "templates".to_string(), total: nodes.len(), nodes })
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let template = state
        .pool
        .get_template(&template_id)
        .ok_or_else(|| VisionKitError::NotFound(format!("template '{template_id}'")))?;
    Ok(Json(template_to_json(&template)))
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.pool.get_stats()).unwrap_or_else(|_| json!({})))
}
