// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Handler for `/v1/core/instance/quick` simplified instance creation.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use visionkit_api::QuickCreateBody;
use visionkit_control::quick::{self, QuickCreateParams};
use visionkit_control::InstanceRecord;

use crate::error::ApiError;
use crate::state::AppState;

/// Folds the structured input/output descriptors into `${TOKEN}` bindings.
fn quick_params_from_body(body: QuickCreateBody) -> QuickCreateParams {
    let mut params = QuickCreateParams {
        name: body.name,
        solution_type: body.solution_type,
        group: body.group.unwrap_or_default(),
        persistent: body.persistent,
        auto_start: body.auto_start,
        frame_rate_limit: body.frame_rate_limit,
        detection_sensitivity: body.detection_sensitivity,
        additional_params: body.additional_params,
        ..QuickCreateParams::default()
    };

    if let Some(input) = body.input {
        params.input_type = input.input_type.clone();
        let endpoint = input.url.or(input.path);
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            let key = match input.input_type.as_str() {
                "rtsp" | "stream" => "RTSP_URL",
                "rtmp" => "RTMP_SRC_URL",
                "udp" => "UDP_PORT",
                "hls" => "HLS_URL",
                _ => "FILE_PATH",
            };
            params.additional_params.entry(key.to_string()).or_insert(endpoint);
        }
    }

    if let Some(output) = body.output {
        params.output_type = output.output_type.clone();
        if let Some(url) = output.url.filter(|u| !u.is_empty()) {
            let key = match output.output_type.as_str() {
                "mqtt" => "MQTT_BROKER_URL",
                _ => "RTMP_URL",
            };
            params.additional_params.entry(key.to_string()).or_insert(url);
        }
    }

    params
}

fn snapshot(state: &AppState, record: &InstanceRecord) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        let params = state.manager.request_params(&record.instance_id).unwrap_or_default();
        obj.insert(
            "additionalParams".to_string(),
            serde_json::to_value(params).unwrap_or_else(|_| json!({})),
        );
    }
    value
}

pub async fn quick_create(
    State(state): State<AppState>,
    Json(body): Json<QuickCreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = quick::build_request(&quick_params_from_body(body))?;
    let record = state.manager.create(request)?;
    tracing::info!(
        instance_id = %record.instance_id,
        solution_id = %record.solution_id,
        "Quick-created instance"
    );
    Ok((StatusCode::CREATED, Json(snapshot(&state, &record))))
}
