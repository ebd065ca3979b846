// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! visionkit-api: the JSON/HTTP API contract.
//!
//! Request and response bodies for the core and SecuRT endpoints. All
//! payloads are camelCase JSON; error bodies are
//! `{"error": "<class>", "message": "<detail>"}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Re-export the wire-shaped core types so the server has a single import
// surface.
pub use visionkit_core::stats::InstanceStatistics;

/// Uniform error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error: error.into(), message: message.into() }
    }
}

// --- quick instance creation ---

/// Input descriptor of the quick-create body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickInput {
    /// `file`, `rtsp`, `rtmp`, `udp` or `hls`.
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Output descriptor of the quick-create body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuickOutput {
    /// `rtmp`, `mqtt`, `screen` or `file`.
    #[serde(rename = "type", default)]
    pub output_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `POST /v1/core/instance/quick` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickCreateBody {
    pub name: String,
    pub solution_type: String,
    #[serde(default)]
    pub input: Option<QuickInput>,
    #[serde(default)]
    pub output: Option<QuickOutput>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub frame_rate_limit: u32,
    #[serde(default)]
    pub detection_sensitivity: Option<String>,
    /// Extra `${TOKEN}` bindings, merged over the per-type defaults.
    #[serde(default)]
    pub additional_params: BTreeMap<String, String>,
}

// --- node pool surface ---

/// `POST /v1/core/nodes` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeBody {
    pub template_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// `PUT /v1/core/nodes/{id}` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodeBody {
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub in_use: Option<bool>,
}

/// Listing wrapper for `GET /v1/core/nodes`. When no pre-configured nodes
/// exist the listing falls back to templates and marks `type: "templates"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeListing {
    #[serde(rename = "type")]
    pub listing_type: String,
    pub total: usize,
    pub nodes: Vec<serde_json::Value>,
}

// --- SecuRT analytics entities ---

/// A single `{x, y}` coordinate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

/// Line create/update body.
#[derive(Debug, Clone, Deserialize)]
pub struct LineBody {
    pub coordinates: Vec<Coordinate>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub color: Option<Vec<u8>>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Area create/update body.
#[derive(Debug, Clone, Deserialize)]
pub struct AreaBody {
    pub coordinates: Vec<Coordinate>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub color: Option<Vec<u8>>,
    #[serde(default)]
    pub name: Option<String>,
}
