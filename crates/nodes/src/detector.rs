// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Detector node constructors.
//!
//! Detectors bind model files through the core resolver and map the
//! categorical detection sensitivity to a score threshold. The inference
//! kernels themselves are opaque runtime objects; the constructors validate
//! that every referenced model file is reachable before handing back a node.

use crate::base::{parse_f32, NodeBase};
use crate::factory::FactoryContext;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Once;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::node::{NodeCategory, NodeHandle, PipelineNode};
use visionkit_core::{is_placeholder, models, platform};

/// Logs which inference backends the probed platform can offer. Emitted once
/// per process, on first detector construction.
fn log_inference_backends() {
    static LOGGED: Once = Once::new();
    LOGGED.call_once(|| {
        let caps = platform::platform_caps();
        if caps.jetson || caps.nvidia {
            tracing::info!(
                jetson = caps.jetson,
                nvidia = caps.nvidia,
                "NVIDIA GPU detected, TensorRT inference devices may be available"
            );
        } else if caps.msdk || caps.vaapi {
            tracing::info!(
                msdk = caps.msdk,
                vaapi = caps.vaapi,
                "Intel GPU detected, OpenVINO inference devices may be available"
            );
        } else {
            tracing::warn!("No GPU detected, inference will run on CPU");
        }
    });
}

// Configuration fields are consumed by the inference runtime through the
// engine seam, not by the control plane itself.
#[allow(dead_code)]
pub(crate) struct DetectorNode {
    base: NodeBase,
    model_files: Vec<String>,
    score_threshold: f32,
}

impl PipelineNode for DetectorNode {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn node_type(&self) -> &str {
        self.base.node_type()
    }

    fn category(&self) -> NodeCategory {
        self.base.category()
    }

    fn start(&self) -> Result<()> {
        self.base.set_running();
        Ok(())
    }

    fn stop(&self) {
        self.base.set_stopped();
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    fn apply_update(&self, params: &BTreeMap<String, String>) -> Result<bool> {
        // Threshold changes apply in place; model changes need a rebuild.
        if params.keys().any(|k| k.ends_with("_path")) {
            return Ok(false);
        }
        Ok(params.contains_key("score_threshold")
            || params.contains_key("detection_sensitivity"))
    }
}

/// Resolves a model reference to an openable path.
///
/// An existing path is used as-is; otherwise the resolver chain is searched.
/// A reference that resolves nowhere keeps its literal value with a warning
/// so instances can be created before their models are installed; a
/// reference that exists but is not a regular file is a hard
/// `DependencyUnavailable`.
fn resolve_model_file(reference: &str) -> Result<String> {
    let path = Path::new(reference);
    if path.exists() {
        if path.is_file() {
            return Ok(reference.to_string());
        }
        return Err(VisionKitError::DependencyUnavailable(format!(
            "model reference '{reference}' is not a regular file"
        )));
    }

    if let Some(found) = models::resolve_model_path(reference) {
        return Ok(found);
    }

    // Absolute references may still resolve by file name under one of the
    // search roots.
    if path.is_absolute() {
        let file_name =
            path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        if !file_name.is_empty() {
            if let Some(found) = models::resolve_model_path(&file_name) {
                return Ok(found);
            }
        }
    }

    tracing::warn!(
        reference = %reference,
        "Model reference did not resolve to an existing file; keeping it verbatim"
    );
    Ok(reference.to_string())
}

fn required_model_param(
    params: &BTreeMap<String, String>,
    request_key: &str,
    param_key: &str,
    ctx: &FactoryContext<'_>,
) -> Result<String> {
    if let Some(value) = ctx.request.param(request_key) {
        if !is_placeholder(value) {
            return Ok(value.to_string());
        }
    }
    match params.get(param_key) {
        Some(value) if !value.is_empty() && !is_placeholder(value) => Ok(value.clone()),
        _ => Err(VisionKitError::InvalidArgument(format!(
            "missing required parameter '{param_key}'"
        ))),
    }
}

/// Score threshold precedence: explicit `score_threshold` parameter, then the
/// request's categorical detection sensitivity.
fn resolve_score_threshold(
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> f32 {
    params
        .get("score_threshold")
        .filter(|v| !is_placeholder(v))
        .and_then(|v| parse_f32(v))
        .unwrap_or_else(|| models::map_detection_sensitivity(&ctx.request.detection_sensitivity))
}

pub(crate) fn create_yunet_face_detector(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    log_inference_backends();
    let model_reference = required_model_param(params, "MODEL_PATH", "model_path", ctx)?;
    let model_path = resolve_model_file(&model_reference)?;
    let score_threshold = resolve_score_threshold(params, ctx);

    tracing::info!(
        node = %node_name,
        model = %model_path,
        score_threshold,
        "Creating YuNet face detector"
    );
    Ok(std::sync::Arc::new(DetectorNode {
        base: NodeBase::new(node_name, "yunet_face_detector", NodeCategory::Detector)?,
        model_files: vec![model_path],
        score_threshold,
    }))
}

pub(crate) fn create_yolo_detector(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    log_inference_backends();
    let weights = required_model_param(params, "WEIGHTS_PATH", "weights_path", ctx)?;
    let config = required_model_param(params, "CONFIG_PATH", "config_path", ctx)?;
    let labels = required_model_param(params, "LABELS_PATH", "labels_path", ctx)?;

    let mut model_files = Vec::with_capacity(3);
    for reference in [&weights, &config, &labels] {
        model_files.push(resolve_model_file(reference)?);
    }
    let score_threshold = resolve_score_threshold(params, ctx);

    tracing::info!(node = %node_name, weights = %model_files[0], "Creating YOLO detector");
    Ok(std::sync::Arc::new(DetectorNode {
        base: NodeBase::new(node_name, "yolo_detector", NodeCategory::Detector)?,
        model_files,
        score_threshold,
    }))
}

pub(crate) fn create_mask_rcnn_detector(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    log_inference_backends();
    let model = required_model_param(params, "MODEL_PATH", "model_path", ctx)?;
    let model_config = required_model_param(params, "MODEL_CONFIG_PATH", "model_config_path", ctx)?;

    let model_files = vec![resolve_model_file(&model)?, resolve_model_file(&model_config)?];
    let score_threshold = resolve_score_threshold(params, ctx);

    tracing::info!(node = %node_name, model = %model_files[0], "Creating Mask R-CNN detector");
    Ok(std::sync::Arc::new(DetectorNode {
        base: NodeBase::new(node_name, "mask_rcnn_detector", NodeCategory::Detector)?,
        model_files,
        score_threshold,
    }))
}

pub(crate) fn create_motion_detector(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let sensitivity = params
        .get("sensitivity")
        .filter(|v| !is_placeholder(v))
        .map_or_else(|| ctx.request.movement_sensitivity.clone(), Clone::clone);
    let score_threshold = models::map_detection_sensitivity(&sensitivity);

    tracing::info!(node = %node_name, sensitivity = %sensitivity, "Creating motion detector");
    Ok(std::sync::Arc::new(DetectorNode {
        base: NodeBase::new(node_name, "motion_detector", NodeCategory::Detector)?,
        model_files: Vec::new(),
        score_threshold,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use visionkit_core::{ConfigStore, CreateInstanceRequest};

    fn write_model(dir: &Path, rel: &str) -> String {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        std::fs::write(&path, b"model").expect("write");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_yunet_uses_sensitivity_threshold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = write_model(dir.path(), "models/face/yunet.onnx");

        let mut request = CreateInstanceRequest::new("t", "s");
        request.detection_sensitivity = "High".to_string();
        request.additional_params.insert("MODEL_PATH".to_string(), model);
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let ctx = FactoryContext {
            request: &request,
            instance_id: "i",
            existing_rtmp_keys: &keys,
            config: &config,
        };

        let node =
            create_yunet_face_detector("det_x", &BTreeMap::new(), &ctx).expect("node");
        assert_eq!(node.node_type(), "yunet_face_detector");
    }

    #[test]
    fn test_missing_model_warns_but_creates() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request
            .additional_params
            .insert("MODEL_PATH".to_string(), "/nonexistent/dir/model.onnx".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let ctx = FactoryContext {
            request: &request,
            instance_id: "i",
            existing_rtmp_keys: &keys,
            config: &config,
        };

        // Instances may be created before their models are installed.
        let node = create_yunet_face_detector("det_x", &BTreeMap::new(), &ctx).expect("node");
        assert_eq!(node.node_type(), "yunet_face_detector");
    }

    #[test]
    fn test_model_reference_to_directory_is_dependency_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut request = CreateInstanceRequest::new("t", "s");
        request.additional_params.insert(
            "MODEL_PATH".to_string(),
            dir.path().to_string_lossy().into_owned(),
        );
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let ctx = FactoryContext {
            request: &request,
            instance_id: "i",
            existing_rtmp_keys: &keys,
            config: &config,
        };

        let err = create_yunet_face_detector("det_x", &BTreeMap::new(), &ctx);
        assert!(matches!(err, Err(VisionKitError::DependencyUnavailable(_))));
    }

    #[test]
    fn test_score_threshold_param_beats_sensitivity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let model = write_model(dir.path(), "m.onnx");

        let mut request = CreateInstanceRequest::new("t", "s");
        request.detection_sensitivity = "High".to_string();
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let ctx = FactoryContext {
            request: &request,
            instance_id: "i",
            existing_rtmp_keys: &keys,
            config: &config,
        };

        let mut params = BTreeMap::new();
        params.insert("model_path".to_string(), model);
        params.insert("score_threshold".to_string(), "0.42".to_string());
        assert!((resolve_score_threshold(&params, &ctx) - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn test_motion_detector_needs_no_model() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let ctx = FactoryContext {
            request: &request,
            instance_id: "i",
            existing_rtmp_keys: &keys,
            config: &config,
        };
        let node = create_motion_detector("motion_x", &BTreeMap::new(), &ctx).expect("node");
        assert_eq!(node.category(), NodeCategory::Detector);
    }
}
