// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node factory dispatch.
//!
//! One constructor per node type, grouped by category. Every constructor
//! follows the same contract: a non-empty node name, a string parameter map
//! and (for request-aware nodes) the originating create request plus target
//! instance id. The result is either a ready [`NodeHandle`] or `None` when
//! the node is elided because an optional dependency is absent.

use crate::{broker, destination, detector, processor, source};
use std::collections::{BTreeMap, HashSet};
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::node::{NodeCategory, NodeHandle};
use visionkit_core::{ConfigStore, CreateInstanceRequest};

/// Per-build inputs threaded through every constructor.
pub struct FactoryContext<'a> {
    pub request: &'a CreateInstanceRequest,
    pub instance_id: &'a str,
    /// RTMP stream keys already in use by sibling instances.
    pub existing_rtmp_keys: &'a HashSet<String>,
    pub config: &'a ConfigStore,
}

/// Returns the category a node type dispatches to, or `None` for unknown
/// types.
pub fn category_of(node_type: &str) -> Option<NodeCategory> {
    match node_type {
        "file_src" | "rtsp_src" | "rtmp_src" | "udp_src" | "hls_src" | "app_src" => {
            Some(NodeCategory::Source)
        },
        "yunet_face_detector" | "yolo_detector" | "mask_rcnn_detector" | "motion_detector" => {
            Some(NodeCategory::Detector)
        },
        "sort_tracker" | "osd" | "ba_crossline" => Some(NodeCategory::Processor),
        "file_des" | "rtmp_des" | "rtsp_des" | "screen_des" | "app_des" => {
            Some(NodeCategory::Destination)
        },
        "console_broker" | "enhanced_console_broker" | "mqtt_broker" => Some(NodeCategory::Broker),
        _ => None,
    }
}

/// Whether a failed/unresolved build of this node type may silently drop the
/// node instead of aborting the build. Destinations and brokers are optional
/// sinks; sources and detectors are load-bearing.
pub const fn category_allows_elision(category: NodeCategory) -> bool {
    matches!(category, NodeCategory::Destination | NodeCategory::Broker)
}

/// Builds a node of the given type.
///
/// # Errors
///
/// `InvalidArgument` on unknown node types, empty names, missing required
/// parameters or semantically impossible values;
/// `DependencyUnavailable` when a referenced model file cannot be found.
pub fn create_node(
    node_type: &str,
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    match node_type {
        // Sources
        "file_src" => source::create_file_source(node_name, params, ctx).map(Some),
        "rtsp_src" => source::create_rtsp_source(node_name, params, ctx).map(Some),
        "rtmp_src" => source::create_rtmp_source(node_name, params, ctx).map(Some),
        "udp_src" => source::create_udp_source(node_name, params, ctx).map(Some),
        "hls_src" => source::create_hls_source(node_name, params, ctx).map(Some),
        "app_src" => source::create_app_source(node_name, params, ctx).map(Some),

        // Detectors
        "yunet_face_detector" => {
            detector::create_yunet_face_detector(node_name, params, ctx).map(Some)
        },
        "yolo_detector" => detector::create_yolo_detector(node_name, params, ctx).map(Some),
        "mask_rcnn_detector" => {
            detector::create_mask_rcnn_detector(node_name, params, ctx).map(Some)
        },
        "motion_detector" => detector::create_motion_detector(node_name, params, ctx).map(Some),

        // Processors
        "sort_tracker" => processor::create_sort_tracker(node_name, params, ctx).map(Some),
        "osd" => processor::create_osd(node_name, params, ctx).map(Some),
        "ba_crossline" => processor::create_crossline(node_name, params, ctx).map(Some),

        // Destinations
        "file_des" => destination::create_file_destination(node_name, params, ctx),
        "rtmp_des" => destination::create_rtmp_destination(node_name, params, ctx),
        "rtsp_des" => destination::create_rtsp_destination(node_name, params, ctx),
        "screen_des" => destination::create_screen_destination(node_name, params, ctx),
        "app_des" => destination::create_app_destination(node_name, params, ctx),

        // Brokers
        "console_broker" => broker::create_console_broker(node_name, params, ctx),
        "enhanced_console_broker" => {
            broker::create_enhanced_console_broker(node_name, params, ctx)
        },
        "mqtt_broker" => broker::create_mqtt_broker(node_name, params, ctx),

        other => Err(VisionKitError::InvalidArgument(format!("unknown node type '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_type_has_a_category() {
        for node_type in [
            "file_src",
            "rtsp_src",
            "yunet_face_detector",
            "yolo_detector",
            "sort_tracker",
            "osd",
            "ba_crossline",
            "file_des",
            "rtmp_des",
            "screen_des",
            "console_broker",
            "mqtt_broker",
        ] {
            assert!(category_of(node_type).is_some(), "{node_type} uncategorised");
        }
        assert!(category_of("warp_drive").is_none());
    }

    #[test]
    fn test_unknown_type_is_invalid_argument() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let ctx = FactoryContext {
            request: &request,
            instance_id: "i",
            existing_rtmp_keys: &keys,
            config: &config,
        };
        let err = create_node("warp_drive", "w", &BTreeMap::new(), &ctx);
        assert!(matches!(err, Err(VisionKitError::InvalidArgument(_))));
    }

    #[test]
    fn test_elision_rules() {
        assert!(category_allows_elision(NodeCategory::Destination));
        assert!(category_allows_elision(NodeCategory::Broker));
        assert!(!category_allows_elision(NodeCategory::Source));
        assert!(!category_allows_elision(NodeCategory::Detector));
        assert!(!category_allows_elision(NodeCategory::Processor));
    }
}
