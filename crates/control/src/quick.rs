// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Quick-create translation.
//!
//! The quick endpoint takes a simplified body (solution type plus input and
//! output hints) and expands it into a full [`CreateInstanceRequest`]:
//! solution-type mapping, per-type production defaults, dev→production path
//! conversion and the `RTMP_DES_URL` mirror.

use std::collections::BTreeMap;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::CreateInstanceRequest;
use visionkit_engine::convert_path_to_production;

/// Simplified creation parameters accepted by the quick endpoint.
#[derive(Debug, Clone, Default)]
pub struct QuickCreateParams {
    pub name: String,
    pub solution_type: String,
    pub input_type: String,
    pub output_type: String,
    pub group: String,
    pub persistent: bool,
    pub auto_start: bool,
    pub frame_rate_limit: u32,
    pub detection_sensitivity: Option<String>,
    /// Extra `${TOKEN}` bindings (FILE_PATH, RTSP_URL, ...).
    pub additional_params: BTreeMap<String, String>,
}

/// Maps a solution type plus input/output hints to a default solution id.
/// Empty on unknown types.
pub fn map_solution_type_to_id(solution_type: &str, input_type: &str, output_type: &str) -> Option<String> {
    let solution_type = solution_type.to_lowercase();
    let input = input_type.to_lowercase();
    let output = output_type.to_lowercase();

    let id = match solution_type.as_str() {
        "face_detection" | "face" => match input.as_str() {
            "rtsp" | "stream" => "face_detection_rtsp_default",
            "rtmp" => "face_detection_rtmp_default",
            // File input is the default.
            _ => "face_detection_file_default",
        },
        "ba_crossline" | "crossline" | "behavior_analysis" => {
            if output == "mqtt" {
                "ba_crossline_mqtt_default"
            } else {
                "ba_crossline_default"
            }
        },
        "object_detection" | "yolo" => "object_detection_yolo_default",
        "mask_rcnn" | "segmentation" => {
            if output == "rtmp" {
                "mask_rcnn_rtmp_default"
            } else {
                "mask_rcnn_detection_default"
            }
        },
        "securt" => "securt",
        _ => return None,
    };
    Some(id.to_string())
}

/// Production default parameters per solution type.
pub fn default_params(
    solution_type: &str,
    input_type: &str,
    output_type: &str,
) -> BTreeMap<String, String> {
    let solution_type = solution_type.to_lowercase();
    let input = input_type.to_lowercase();
    let output = output_type.to_lowercase();
    let mut defaults = BTreeMap::new();
    let mut set = |k: &str, v: &str| {
        defaults.insert(k.to_string(), v.to_string());
    };

    match solution_type.as_str() {
        "face_detection" | "face" => {
            match input.as_str() {
                "rtsp" | "stream" => set("RTSP_URL", "rtsp://localhost:8554/stream"),
                _ => set("FILE_PATH", "/opt/edge_ai_api/videos/face.mp4"),
            }
            set(
                "MODEL_PATH",
                "/opt/edge_ai_api/models/face/face_detection_yunet_2022mar.onnx",
            );
            set("RESIZE_RATIO", "1.0");
        },
        "ba_crossline" | "crossline" | "behavior_analysis" => {
            match input.as_str() {
                "rtsp" | "stream" => set("RTSP_URL", "rtsp://localhost:8554/stream"),
                _ => set("FILE_PATH", "/opt/edge_ai_api/videos/face.mp4"),
            }
            set(
                "WEIGHTS_PATH",
                "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721_best.weights",
            );
            set("CONFIG_PATH", "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721.cfg");
            set("LABELS_PATH", "/opt/edge_ai_api/models/det_cls/yolov3_tiny_5classes.txt");
            set("RESIZE_RATIO", "1.0");
            // Crossline coordinates are intentionally not defaulted: the
            // analytics node keeps its own fallback line until entities are
            // configured.
            if output == "mqtt" {
                set("MQTT_BROKER_URL", "localhost");
            }
            if output == "rtmp" {
                set("RTMP_URL", "rtmp://localhost:1935/live/stream");
            }
        },
        "object_detection" | "yolo" => {
            set("FILE_PATH", "/opt/edge_ai_api/videos/face.mp4");
            set(
                "WEIGHTS_PATH",
                "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721_best.weights",
            );
            set("CONFIG_PATH", "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721.cfg");
            set("LABELS_PATH", "/opt/edge_ai_api/models/det_cls/yolov3_tiny_5classes.txt");
            set("RESIZE_RATIO", "1.0");
        },
        "mask_rcnn" | "segmentation" => {
            set("FILE_PATH", "/opt/edge_ai_api/videos/face.mp4");
            set("MODEL_PATH", "/opt/edge_ai_api/models/mask_rcnn/frozen_inference_graph.pb");
            set(
                "MODEL_CONFIG_PATH",
                "/opt/edge_ai_api/models/mask_rcnn/mask_rcnn.pbtxt",
            );
            if output == "rtmp" {
                set("RTMP_URL", "rtmp://localhost:1935/live/stream");
            }
        },
        _ => {},
    }
    defaults
}

/// Keys whose values are filesystem or stream references and therefore get
/// the dev→production rewrite.
fn is_path_key(key: &str) -> bool {
    key.ends_with("_PATH") || key == "FILE_PATH" || key.ends_with("_DIR")
}

/// Expands quick parameters into a full create request.
///
/// User-supplied additional parameters win over the per-type defaults; path
/// values are converted to their production locations and an `RTMP_URL` is
/// mirrored into `RTMP_DES_URL`.
pub fn build_request(params: &QuickCreateParams) -> Result<CreateInstanceRequest> {
    if params.name.trim().is_empty() {
        return Err(VisionKitError::InvalidArgument("'name' must not be empty".to_string()));
    }
    if params.solution_type.trim().is_empty() {
        return Err(VisionKitError::InvalidArgument(
            "'solutionType' must not be empty".to_string(),
        ));
    }

    let solution_id =
        map_solution_type_to_id(&params.solution_type, &params.input_type, &params.output_type)
            .ok_or_else(|| {
                VisionKitError::InvalidArgument(format!(
                    "unknown solution type '{}'",
                    params.solution_type
                ))
            })?;

    let mut request = CreateInstanceRequest::new(params.name.clone(), solution_id);
    request.group.clone_from(&params.group);
    request.persistent = params.persistent;
    request.auto_start = params.auto_start;
    request.frame_rate_limit = params.frame_rate_limit;
    if let Some(sensitivity) = &params.detection_sensitivity {
        request.detection_sensitivity.clone_from(sensitivity);
    }

    let mut merged = default_params(&params.solution_type, &params.input_type, &params.output_type);
    for (key, value) in &params.additional_params {
        merged.insert(key.clone(), value.clone());
    }

    for (key, value) in merged {
        let value = if is_path_key(&key) { convert_path_to_production(&value) } else { value };
        request.additional_params.insert(key, value);
    }

    // The destination URL mirror keeps older clients working.
    if let Some(rtmp) = request.param("RTMP_URL").map(String::from) {
        request.additional_params.entry("RTMP_DES_URL".to_string()).or_insert(rtmp);
    }

    Ok(request)
}
