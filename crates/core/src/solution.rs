// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Solution recipes.
//!
//! A solution is an ordered pipeline of node types with default parameters.
//! Node names may embed the literal token `{instanceId}`, substituted by the
//! pipeline builder at materialisation time. Parameter values of the shape
//! `${TOKEN}` are placeholders resolved against the create request.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// One step of a solution pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub node_type: String,
    pub node_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// A recipe describing an ordered pipeline of node types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionConfig {
    pub solution_id: String,
    pub solution_name: String,
    pub solution_type: String,
    #[serde(default)]
    pub is_default: bool,
    pub pipeline: Vec<NodeSpec>,
}

/// Registry of solution recipes, seeded with the default solutions consumed
/// by the quick-create API and the node pool.
#[derive(Debug, Clone, Default)]
pub struct SolutionRegistry {
    solutions: HashMap<String, SolutionConfig>,
}

impl SolutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for solution in default_solutions() {
            registry.register(solution);
        }
        tracing::info!(count = registry.solutions.len(), "Initialized solution registry");
        registry
    }

    /// Registers a solution, replacing any existing entry with the same id.
    pub fn register(&mut self, solution: SolutionConfig) {
        self.solutions.insert(solution.solution_id.clone(), solution);
    }

    pub fn get(&self, solution_id: &str) -> Option<&SolutionConfig> {
        self.solutions.get(solution_id)
    }

    pub fn contains(&self, solution_id: &str) -> bool {
        self.solutions.contains_key(solution_id)
    }

    pub fn list(&self) -> Vec<SolutionConfig> {
        let mut all: Vec<SolutionConfig> = self.solutions.values().cloned().collect();
        all.sort_by(|a, b| a.solution_id.cmp(&b.solution_id));
        all
    }

    pub fn default_solutions(&self) -> Vec<SolutionConfig> {
        self.list().into_iter().filter(|s| s.is_default).collect()
    }
}

fn spec(node_type: &str, node_name: &str, parameters: &[(&str, &str)]) -> NodeSpec {
    NodeSpec {
        node_type: node_type.to_string(),
        node_name: node_name.to_string(),
        parameters: parameters.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
    }
}

fn solution(
    solution_id: &str,
    solution_name: &str,
    solution_type: &str,
    pipeline: Vec<NodeSpec>,
) -> SolutionConfig {
    SolutionConfig {
        solution_id: solution_id.to_string(),
        solution_name: solution_name.to_string(),
        solution_type: solution_type.to_string(),
        is_default: true,
        pipeline,
    }
}

/// The built-in default solutions.
pub fn default_solutions() -> Vec<SolutionConfig> {
    vec![
        solution(
            "face_detection_file_default",
            "Face Detection (file input)",
            "face_detection",
            vec![
                spec("file_src", "file_src_{instanceId}", &[("file_path", "${FILE_PATH}")]),
                spec(
                    "yunet_face_detector",
                    "face_detector_{instanceId}",
                    &[("model_path", "${MODEL_PATH}")],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("rtmp_des", "rtmp_des_{instanceId}", &[("rtmp_url", "${RTMP_URL}")]),
            ],
        ),
        solution(
            "face_detection_rtsp_default",
            "Face Detection (RTSP input)",
            "face_detection",
            vec![
                spec(
                    "rtsp_src",
                    "rtsp_src_{instanceId}",
                    &[("rtsp_url", "${RTSP_URL}"), ("resize_ratio", "${RESIZE_RATIO}")],
                ),
                spec(
                    "yunet_face_detector",
                    "face_detector_{instanceId}",
                    &[("model_path", "${MODEL_PATH}")],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("rtmp_des", "rtmp_des_{instanceId}", &[("rtmp_url", "${RTMP_URL}")]),
            ],
        ),
        solution(
            "face_detection_rtmp_default",
            "Face Detection (RTMP input)",
            "face_detection",
            vec![
                spec("rtmp_src", "rtmp_src_{instanceId}", &[("rtmp_url", "${RTMP_SRC_URL}")]),
                spec(
                    "yunet_face_detector",
                    "face_detector_{instanceId}",
                    &[("model_path", "${MODEL_PATH}")],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("rtmp_des", "rtmp_des_{instanceId}", &[("rtmp_url", "${RTMP_URL}")]),
            ],
        ),
        solution(
            "ba_crossline_default",
            "Crossline Behavior Analysis",
            "ba_crossline",
            vec![
                spec("file_src", "file_src_{instanceId}", &[("file_path", "${FILE_PATH}")]),
                spec(
                    "yolo_detector",
                    "detector_{instanceId}",
                    &[
                        ("weights_path", "${WEIGHTS_PATH}"),
                        ("config_path", "${CONFIG_PATH}"),
                        ("labels_path", "${LABELS_PATH}"),
                    ],
                ),
                spec("sort_tracker", "tracker_{instanceId}", &[]),
                spec(
                    "ba_crossline",
                    "crossline_{instanceId}",
                    &[
                        ("start_x", "${CROSSLINE_START_X}"),
                        ("start_y", "${CROSSLINE_START_Y}"),
                        ("end_x", "${CROSSLINE_END_X}"),
                        ("end_y", "${CROSSLINE_END_Y}"),
                    ],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("console_broker", "broker_{instanceId}", &[]),
                spec("rtmp_des", "rtmp_des_{instanceId}", &[("rtmp_url", "${RTMP_URL}")]),
            ],
        ),
        solution(
            "ba_crossline_mqtt_default",
            "Crossline Behavior Analysis (MQTT output)",
            "ba_crossline",
            vec![
                spec("file_src", "file_src_{instanceId}", &[("file_path", "${FILE_PATH}")]),
                spec(
                    "yolo_detector",
                    "detector_{instanceId}",
                    &[
                        ("weights_path", "${WEIGHTS_PATH}"),
                        ("config_path", "${CONFIG_PATH}"),
                        ("labels_path", "${LABELS_PATH}"),
                    ],
                ),
                spec("sort_tracker", "tracker_{instanceId}", &[]),
                spec("ba_crossline", "crossline_{instanceId}", &[]),
                spec("osd", "osd_{instanceId}", &[]),
                spec(
                    "mqtt_broker",
                    "broker_{instanceId}",
                    &[("mqtt_broker_url", "${MQTT_BROKER_URL}"), ("mqtt_topic", "${MQTT_TOPIC}")],
                ),
            ],
        ),
        solution(
            "object_detection_yolo_default",
            "YOLO Object Detection",
            "object_detection",
            vec![
                spec("file_src", "file_src_{instanceId}", &[("file_path", "${FILE_PATH}")]),
                spec(
                    "yolo_detector",
                    "detector_{instanceId}",
                    &[
                        ("weights_path", "${WEIGHTS_PATH}"),
                        ("config_path", "${CONFIG_PATH}"),
                        ("labels_path", "${LABELS_PATH}"),
                    ],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("screen_des", "screen_des_{instanceId}", &[]),
            ],
        ),
        solution(
            "mask_rcnn_detection_default",
            "Mask R-CNN Segmentation",
            "mask_rcnn",
            vec![
                spec("file_src", "file_src_{instanceId}", &[("file_path", "${FILE_PATH}")]),
                spec(
                    "mask_rcnn_detector",
                    "detector_{instanceId}",
                    &[
                        ("model_path", "${MODEL_PATH}"),
                        ("model_config_path", "${MODEL_CONFIG_PATH}"),
                    ],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("screen_des", "screen_des_{instanceId}", &[]),
            ],
        ),
        solution(
            "mask_rcnn_rtmp_default",
            "Mask R-CNN Segmentation (RTMP output)",
            "mask_rcnn",
            vec![
                spec("file_src", "file_src_{instanceId}", &[("file_path", "${FILE_PATH}")]),
                spec(
                    "mask_rcnn_detector",
                    "detector_{instanceId}",
                    &[
                        ("model_path", "${MODEL_PATH}"),
                        ("model_config_path", "${MODEL_CONFIG_PATH}"),
                    ],
                ),
                spec("osd", "osd_{instanceId}", &[]),
                spec("rtmp_des", "rtmp_des_{instanceId}", &[("rtmp_url", "${RTMP_URL}")]),
            ],
        ),
        solution(
            "securt",
            "SecuRT Analytics",
            "securt",
            vec![
                spec("rtsp_src", "rtsp_src_{instanceId}", &[("rtsp_url", "${RTSP_URL}")]),
                spec(
                    "yolo_detector",
                    "detector_{instanceId}",
                    &[
                        ("weights_path", "${WEIGHTS_PATH}"),
                        ("config_path", "${CONFIG_PATH}"),
                        ("labels_path", "${LABELS_PATH}"),
                    ],
                ),
                spec("sort_tracker", "tracker_{instanceId}", &[]),
                spec("ba_crossline", "crossline_{instanceId}", &[]),
                spec("osd", "osd_{instanceId}", &[]),
                spec("console_broker", "broker_{instanceId}", &[]),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contains_quick_solutions() {
        let registry = SolutionRegistry::with_defaults();
        for id in [
            "face_detection_file_default",
            "face_detection_rtsp_default",
            "ba_crossline_default",
            "ba_crossline_mqtt_default",
            "object_detection_yolo_default",
            "mask_rcnn_detection_default",
            "securt",
        ] {
            assert!(registry.contains(id), "missing default solution {id}");
        }
    }

    #[test]
    fn test_pipeline_order_is_preserved() {
        let registry = SolutionRegistry::with_defaults();
        let face = registry.get("face_detection_file_default").expect("solution");
        let types: Vec<&str> = face.pipeline.iter().map(|s| s.node_type.as_str()).collect();
        assert_eq!(types, vec!["file_src", "yunet_face_detector", "osd", "rtmp_des"]);
    }

    #[test]
    fn test_node_names_embed_instance_token() {
        let registry = SolutionRegistry::with_defaults();
        for solution in registry.default_solutions() {
            for step in &solution.pipeline {
                assert!(
                    step.node_name.contains("{instanceId}"),
                    "{} in {} lacks the instance token",
                    step.node_name,
                    solution.solution_id
                );
            }
        }
    }
}
