// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Handlers for `/v1/core/config` system configuration CRUD.
//!
//! `POST` merges, `PUT` replaces, `PATCH` updates a section, `DELETE`
//! removes one; `POST /reset` restores defaults. Mutations persist the tree
//! to its backing file best-effort.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use visionkit_core::VisionKitError;

use crate::error::ApiError;
use crate::state::AppState;

fn persist(state: &AppState) {
    if let Err(e) = state.config_store.save() {
        tracing::warn!(error = %e, "Failed to persist system config");
    }
}

fn ok() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn get_root(State(state): State<AppState>) -> Json<Value> {
    Json(state.config_store.root())
}

pub async fn get_section(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.config_store.get(&path)?))
}

pub async fn merge_root(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.config_store.set_merge("", body)?;
    persist(&state);
    Ok(ok())
}

pub async fn merge_section(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.config_store.set_merge(&path, body)?;
    persist(&state);
    Ok(ok())
}

pub async fn replace_root(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.config_store.set_replace(body)?;
    persist(&state);
    Ok(ok())
}

/// `PUT` on a section: the value substitutes whatever was there.
pub async fn replace_section(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    state.config_store.delete(&path);
    state.config_store.set_merge(&path, body)?;
    persist(&state);
    Ok(ok())
}

pub async fn delete_section(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.config_store.delete(&path) {
        return Err(VisionKitError::NotFound(format!("config path '{path}'")).into());
    }
    persist(&state);
    Ok(ok())
}

pub async fn reset(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.config_store.reset_defaults()?;
    Ok(ok())
}
