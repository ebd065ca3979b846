// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node template registry.
//!
//! Templates are the static descriptors of node types: category, parameter
//! schema and display metadata. On startup the built-in catalogue (standing in
//! for the SDK-provided node type list) is imported, then a small set of
//! "special" templates overwrites entries with richer defaults.

use crate::node::NodeCategory;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Immutable descriptor of a node type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    pub template_id: String,
    pub node_type: String,
    pub category: NodeCategory,
    pub display_name: String,
    pub description: String,
    /// Default parameter values, merged under user overrides at node
    /// creation time.
    pub default_parameters: BTreeMap<String, String>,
    /// Parameter names that must be present after the defaults merge.
    pub required_parameters: Vec<String>,
    pub optional_parameters: Vec<String>,
    /// Hint that the node can be instantiated without user input.
    pub pre_configured: bool,
}

impl NodeTemplate {
    /// A template is self-sufficient when every required parameter has a
    /// default value.
    pub fn is_self_sufficient(&self) -> bool {
        self.required_parameters.iter().all(|p| self.default_parameters.contains_key(p))
    }
}

/// In-memory mapping from template id to [`NodeTemplate`].
///
/// Listing order is stable for a given registry state but insertion order is
/// not guaranteed.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, NodeTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry seeded with the built-in catalogue plus the special
    /// overwrite pass.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for template in import_templates() {
            registry.register(template);
        }
        // Special templates intentionally overwrite the imported entries.
        for template in special_templates() {
            let id = template.template_id.clone();
            registry.templates.insert(id, template);
        }
        tracing::info!(count = registry.templates.len(), "Initialized node template registry");
        registry
    }

    /// Registers a template. Returns false without mutation when a template
    /// with the same id already exists.
    pub fn register(&mut self, template: NodeTemplate) -> bool {
        if self.templates.contains_key(&template.template_id) {
            return false;
        }
        self.templates.insert(template.template_id.clone(), template);
        true
    }

    pub fn get(&self, template_id: &str) -> Option<&NodeTemplate> {
        self.templates.get(template_id)
    }

    /// Finds the template whose node type matches. Node types and template
    /// ids are 1:1 in the built-in catalogue.
    pub fn get_by_node_type(&self, node_type: &str) -> Option<&NodeTemplate> {
        self.templates.values().find(|t| t.node_type == node_type)
    }

    pub fn list(&self) -> Vec<NodeTemplate> {
        let mut all: Vec<NodeTemplate> = self.templates.values().cloned().collect();
        all.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        all
    }

    pub fn list_by_category(&self, category: NodeCategory) -> Vec<NodeTemplate> {
        let mut matching: Vec<NodeTemplate> =
            self.templates.values().filter(|t| t.category == category).cloned().collect();
        matching.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        matching
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn params(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

fn names(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|s| (*s).to_string()).collect()
}

fn template(
    node_type: &str,
    category: NodeCategory,
    display_name: &str,
    description: &str,
    defaults: BTreeMap<String, String>,
    required: Vec<String>,
    optional: Vec<String>,
) -> NodeTemplate {
    let pre_configured = required.iter().all(|p| defaults.contains_key(p));
    NodeTemplate {
        template_id: node_type.to_string(),
        node_type: node_type.to_string(),
        category,
        display_name: display_name.to_string(),
        description: description.to_string(),
        default_parameters: defaults,
        required_parameters: required,
        optional_parameters: optional,
        pre_configured,
    }
}

/// The built-in node type catalogue. Covers every node type referenced by the
/// default solutions.
pub fn import_templates() -> Vec<NodeTemplate> {
    vec![
        // --- sources ---
        template(
            "file_src",
            NodeCategory::Source,
            "File Source",
            "Reads frames from a local video file",
            params(&[("file_path", "/opt/edge_ai_api/videos/face.mp4"), ("resize_ratio", "1.0")]),
            names(&["file_path"]),
            names(&["resize_ratio", "loop", "skip_interval"]),
        ),
        template(
            "rtsp_src",
            NodeCategory::Source,
            "RTSP Source",
            "Pulls a live RTSP stream",
            params(&[("rtsp_url", "rtsp://localhost:8554/stream"), ("resize_ratio", "0.6")]),
            names(&["rtsp_url"]),
            names(&["resize_ratio", "gst_decoder_name", "skip_interval", "rtsp_transport"]),
        ),
        template(
            "rtmp_src",
            NodeCategory::Source,
            "RTMP Source",
            "Pulls a live RTMP stream",
            params(&[("rtmp_url", "rtmp://localhost:1935/live/stream"), ("resize_ratio", "1.0")]),
            names(&["rtmp_url"]),
            names(&["resize_ratio"]),
        ),
        template(
            "udp_src",
            NodeCategory::Source,
            "UDP Source",
            "Receives an MPEG-TS stream over UDP",
            params(&[("port", "5600")]),
            names(&["port"]),
            names(&["resize_ratio"]),
        ),
        template(
            "hls_src",
            NodeCategory::Source,
            "HLS Source",
            "Pulls an HLS playlist",
            params(&[("hls_url", "http://localhost:8080/stream.m3u8")]),
            names(&["hls_url"]),
            names(&["resize_ratio"]),
        ),
        template(
            "app_src",
            NodeCategory::Source,
            "Application Source",
            "Frames pushed programmatically by the host application",
            params(&[]),
            names(&[]),
            names(&["resize_ratio"]),
        ),
        // --- detectors ---
        template(
            "yunet_face_detector",
            NodeCategory::Detector,
            "YuNet Face Detector",
            "ONNX face detection",
            params(&[
                ("model_path", "/opt/edge_ai_api/models/face/face_detection_yunet_2022mar.onnx"),
                ("score_threshold", "0.7"),
            ]),
            names(&["model_path"]),
            names(&["score_threshold", "nms_threshold", "top_k"]),
        ),
        template(
            "yolo_detector",
            NodeCategory::Detector,
            "YOLO Object Detector",
            "Darknet-family object detection",
            params(&[
                ("weights_path", "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721_best.weights"),
                ("config_path", "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721.cfg"),
                ("labels_path", "/opt/edge_ai_api/models/det_cls/yolov3_tiny_5classes.txt"),
                ("score_threshold", "0.7"),
            ]),
            names(&["weights_path", "config_path", "labels_path"]),
            names(&["score_threshold"]),
        ),
        template(
            "mask_rcnn_detector",
            NodeCategory::Detector,
            "Mask R-CNN Detector",
            "Instance segmentation",
            params(&[
                ("model_path", "/opt/edge_ai_api/models/mask_rcnn/frozen_inference_graph.pb"),
                ("model_config_path", "/opt/edge_ai_api/models/mask_rcnn/mask_rcnn.pbtxt"),
            ]),
            names(&["model_path", "model_config_path"]),
            names(&["score_threshold"]),
        ),
        template(
            "motion_detector",
            NodeCategory::Detector,
            "Motion Detector",
            "Frame-differencing motion detection",
            params(&[("sensitivity", "Medium")]),
            names(&[]),
            names(&["sensitivity"]),
        ),
        // --- processors ---
        template(
            "sort_tracker",
            NodeCategory::Processor,
            "SORT Tracker",
            "Multi-object tracking over detections",
            params(&[("max_age", "30"), ("min_hits", "3")]),
            names(&[]),
            names(&["max_age", "min_hits"]),
        ),
        template(
            "osd",
            NodeCategory::Processor,
            "On-Screen Display",
            "Draws detections, tracks and analytics overlays",
            params(&[]),
            names(&[]),
            names(&["font_path", "line_width"]),
        ),
        template(
            "ba_crossline",
            NodeCategory::Processor,
            "Crossline Analytics",
            "Counts tracked objects crossing configured lines",
            params(&[]),
            names(&[]),
            names(&["start_x", "start_y", "end_x", "end_y"]),
        ),
        // --- destinations ---
        template(
            "file_des",
            NodeCategory::Destination,
            "File Destination",
            "Records the output stream to disk",
            params(&[("output_dir", "/opt/edge_ai_api/recordings")]),
            names(&["output_dir"]),
            names(&["max_duration"]),
        ),
        template(
            "rtmp_des",
            NodeCategory::Destination,
            "RTMP Destination",
            "Publishes the output stream to an RTMP endpoint",
            params(&[]),
            names(&["rtmp_url"]),
            names(&[]),
        ),
        template(
            "rtsp_des",
            NodeCategory::Destination,
            "RTSP Destination",
            "Serves the output stream over RTSP",
            params(&[("path", "/stream")]),
            names(&["path"]),
            names(&["port"]),
        ),
        template(
            "screen_des",
            NodeCategory::Destination,
            "Screen Destination",
            "Renders the output stream to a local display",
            params(&[]),
            names(&[]),
            names(&[]),
        ),
        template(
            "app_des",
            NodeCategory::Destination,
            "Application Destination",
            "Delivers frames to the host application",
            params(&[]),
            names(&[]),
            names(&[]),
        ),
        // --- brokers ---
        template(
            "console_broker",
            NodeCategory::Broker,
            "Console Broker",
            "Writes JSON events to the process log",
            params(&[]),
            names(&[]),
            names(&[]),
        ),
        template(
            "enhanced_console_broker",
            NodeCategory::Broker,
            "Enhanced Console Broker",
            "Writes annotated JSON events to the process log",
            params(&[("pretty", "false")]),
            names(&[]),
            names(&["pretty"]),
        ),
        template(
            "mqtt_broker",
            NodeCategory::Broker,
            "MQTT Broker",
            "Publishes JSON events to an MQTT topic",
            params(&[("mqtt_port", "1883"), ("mqtt_topic", "events")]),
            names(&["mqtt_broker_url"]),
            names(&["mqtt_port", "mqtt_topic", "mqtt_username", "mqtt_password"]),
        ),
    ]
}

/// Templates that overwrite imported entries with richer defaults.
pub fn special_templates() -> Vec<NodeTemplate> {
    vec![
        template(
            "rtsp_src",
            NodeCategory::Source,
            "RTSP Source",
            "Pulls a live RTSP stream; decoder chosen from the configured priority list",
            params(&[
                ("rtsp_url", "rtsp://localhost:8554/stream"),
                ("resize_ratio", "0.6"),
                ("skip_interval", "0"),
            ]),
            names(&["rtsp_url"]),
            names(&["resize_ratio", "gst_decoder_name", "skip_interval", "rtsp_transport"]),
        ),
        template(
            "osd",
            NodeCategory::Processor,
            "On-Screen Display",
            "Draws detections, tracks and analytics overlays",
            params(&[("line_width", "2")]),
            names(&[]),
            names(&["font_path", "line_width"]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = TemplateRegistry::new();
        let mut t = import_templates().remove(0);
        assert!(registry.register(t.clone()));

        t.display_name = "Changed".to_string();
        assert!(!registry.register(t));
        assert_eq!(registry.get("file_src").map(|t| t.display_name.as_str()), Some("File Source"));
    }

    #[test]
    fn test_defaults_include_special_overrides() {
        let registry = TemplateRegistry::with_defaults();
        let osd = registry.get("osd").expect("osd template");
        assert_eq!(osd.default_parameters.get("line_width").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_self_sufficiency() {
        let registry = TemplateRegistry::with_defaults();
        assert!(registry.get("file_src").is_some_and(NodeTemplate::is_self_sufficient));
        // rtmp_des requires rtmp_url with no default: user input needed.
        assert!(!registry.get("rtmp_des").is_some_and(NodeTemplate::is_self_sufficient));
    }

    #[test]
    fn test_list_by_category() {
        let registry = TemplateRegistry::with_defaults();
        let brokers = registry.list_by_category(NodeCategory::Broker);
        assert!(brokers.iter().any(|t| t.node_type == "mqtt_broker"));
        assert!(brokers.iter().all(|t| t.category == NodeCategory::Broker));
    }
}
