// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Pipeline builder.
//!
//! Materialises a solution recipe into an ordered list of concrete node
//! handles: looks up templates, substitutes `{instanceId}` into node names,
//! resolves `${TOKEN}` placeholders against the request and template
//! defaults, allocates unique external resources (RTMP stream keys) and
//! dispatches to the node factory. A failed build allocates nothing
//! observable: already-created handles are destroyed before returning.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::node::NodeHandle;
use visionkit_core::{is_placeholder, ConfigStore, CreateInstanceRequest, NodePool, SolutionRegistry};
use visionkit_nodes::{category_allows_elision, category_of, create_node, extract_rtmp_stream_key, FactoryContext};

/// Ordered dev-prefix → production-prefix path rewrites.
const PATH_REWRITES: &[(&str, &str)] = &[
    ("./cvedix_data/test_video/", "/opt/edge_ai_api/videos/"),
    ("./cvedix_data/models/", "/opt/edge_ai_api/models/"),
    ("./cvedix_data/", "/opt/edge_ai_api/"),
    ("cvedix_data/test_video/", "/opt/edge_ai_api/videos/"),
    ("cvedix_data/models/", "/opt/edge_ai_api/models/"),
    ("cvedix_data/", "/opt/edge_ai_api/"),
    ("./test_video/", "/opt/edge_ai_api/videos/"),
    ("./models/", "/opt/edge_ai_api/models/"),
];

/// Rewrites a development path to its production location. Non-matching
/// values pass through unchanged.
pub fn convert_path_to_production(value: &str) -> String {
    for (prefix, replacement) in PATH_REWRITES {
        if let Some(rest) = value.strip_prefix(prefix) {
            return format!("{replacement}{rest}");
        }
    }
    value.to_string()
}

/// The realised pipeline: ordered handles plus the full parameter binding
/// that produced them, kept so a later update can be diffed against the
/// current state.
pub struct BuiltPipeline {
    pub nodes: Vec<NodeHandle>,
    /// node name → resolved parameters, in pipeline order by insertion.
    pub bindings: BTreeMap<String, BTreeMap<String, String>>,
    /// The RTMP publish URL allocated for this instance, if any.
    pub rtmp_url: Option<String>,
}

/// Turns solution recipes into running-ready node lists.
pub struct PipelineBuilder {
    pool: Arc<NodePool>,
    solutions: Arc<SolutionRegistry>,
    config: Arc<ConfigStore>,
}

impl PipelineBuilder {
    pub fn new(
        pool: Arc<NodePool>,
        solutions: Arc<SolutionRegistry>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self { pool, solutions, config }
    }

    pub fn solutions(&self) -> &Arc<SolutionRegistry> {
        &self.solutions
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    /// Builds the ordered node list for an instance.
    ///
    /// `existing_rtmp_keys` is the set of stream keys already in use by
    /// currently-loaded sibling instances; keys allocated within this build
    /// are added so two placeholders resolving to the same key collide
    /// deterministically (the second gets the instance-id suffix).
    pub fn build(
        &self,
        instance_id: &str,
        request: &CreateInstanceRequest,
        existing_rtmp_keys: &HashSet<String>,
    ) -> Result<BuiltPipeline> {
        let solution = self
            .solutions
            .get(&request.solution)
            .ok_or_else(|| VisionKitError::NotFound(format!("solution '{}'", request.solution)))?
            .clone();

        tracing::info!(
            instance_id = %instance_id,
            solution_id = %solution.solution_id,
            steps = solution.pipeline.len(),
            "Building pipeline"
        );

        let mut rtmp_keys = existing_rtmp_keys.clone();
        let mut nodes: Vec<NodeHandle> = Vec::with_capacity(solution.pipeline.len());
        let mut bindings = BTreeMap::new();
        let mut rtmp_url = None;

        for step in &solution.pipeline {
            let node_name = step.node_name.replace("{instanceId}", instance_id);
            let category = category_of(&step.node_type).ok_or_else(|| {
                VisionKitError::InvalidArgument(format!(
                    "solution '{}' references unknown node type '{}'",
                    solution.solution_id, step.node_type
                ))
            })?;

            let params = self.resolve_parameters(&step.node_type, &step.parameters, request);

            // Unresolved residue on a required slot: skip when the category
            // treats the node as optional, abort otherwise.
            if let Some(missing) = self.unresolved_required_slot(&step.node_type, &params) {
                if category_allows_elision(category) {
                    tracing::warn!(
                        node = %node_name,
                        parameter = %missing,
                        "Skipping optional node with unresolved required slot"
                    );
                    continue;
                }
                release_nodes(&nodes);
                return Err(VisionKitError::InvalidArgument(format!(
                    "unresolved placeholder for required parameter '{missing}' of node '{node_name}'"
                )));
            }

            let ctx = FactoryContext {
                request,
                instance_id,
                existing_rtmp_keys: &rtmp_keys,
                config: &self.config,
            };

            let built = match create_node(&step.node_type, &node_name, &params, &ctx) {
                Ok(built) => built,
                Err(e) => {
                    release_nodes(&nodes);
                    return Err(e);
                },
            };

            // Skipped nodes drop out of the graph silently.
            let Some(handle) = built else {
                continue;
            };

            if handle.node_type() == "rtmp_des" {
                if let Some(url) = handle.endpoint() {
                    if let Some(key) = extract_rtmp_stream_key(url) {
                        rtmp_keys.insert(key);
                    }
                    rtmp_url.get_or_insert_with(|| url.to_string());
                }
            }

            bindings.insert(handle.name().to_string(), params);
            nodes.push(handle);
        }

        if nodes.is_empty() {
            return Err(VisionKitError::InvalidArgument(format!(
                "solution '{}' produced an empty pipeline",
                solution.solution_id
            )));
        }

        Ok(BuiltPipeline { nodes, bindings, rtmp_url })
    }

    /// Resolves one step's parameters: placeholders are replaced from the
    /// request (by token name) or the template defaults (by slot name);
    /// request values win over recipe values, and path-shaped values are
    /// rewritten to their production locations.
    fn resolve_parameters(
        &self,
        node_type: &str,
        spec_parameters: &BTreeMap<String, String>,
        request: &CreateInstanceRequest,
    ) -> BTreeMap<String, String> {
        let template_defaults = self
            .pool
            .get_template(node_type)
            .map(|t| t.default_parameters)
            .unwrap_or_default();

        let mut resolved = BTreeMap::new();
        for (key, value) in spec_parameters {
            let value = if is_placeholder(value) {
                let token = &value[2..value.len() - 1];
                match request.param(token) {
                    Some(from_request) => from_request.to_string(),
                    None => match template_defaults.get(key) {
                        Some(default) => default.clone(),
                        // Leave the residue; the required-slot check and the
                        // factories decide what happens to it.
                        None => value.clone(),
                    },
                }
            } else {
                value.clone()
            };
            resolved.insert(key.clone(), convert_path_to_production(&value));
        }
        resolved
    }

    /// Returns the name of a required slot that still carries placeholder
    /// residue, if any.
    fn unresolved_required_slot(
        &self,
        node_type: &str,
        params: &BTreeMap<String, String>,
    ) -> Option<String> {
        let template = self.pool.get_template(node_type)?;
        for required in &template.required_parameters {
            if params.get(required).is_some_and(|v| is_placeholder(v)) {
                return Some(required.clone());
            }
        }
        None
    }
}

/// Releases partially-built handles after a failed build.
fn release_nodes(nodes: &[NodeHandle]) {
    for node in nodes.iter().rev() {
        node.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn builder() -> PipelineBuilder {
        PipelineBuilder::new(
            Arc::new(NodePool::with_default_templates()),
            Arc::new(SolutionRegistry::with_defaults()),
            Arc::new(ConfigStore::new()),
        )
    }

    fn write_file(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        fs::write(path, b"x").expect("write");
    }

    fn face_request(dir: &Path) -> CreateInstanceRequest {
        let video = dir.join("face.mp4");
        let model = dir.join("yunet.onnx");
        write_file(&video);
        write_file(&model);

        let mut request = CreateInstanceRequest::new("t1", "face_detection_file_default");
        request
            .additional_params
            .insert("FILE_PATH".to_string(), video.to_string_lossy().into_owned());
        request
            .additional_params
            .insert("MODEL_PATH".to_string(), model.to_string_lossy().into_owned());
        request
    }

    #[test]
    fn test_unknown_solution_is_not_found() {
        let request = CreateInstanceRequest::new("t", "no_such_solution");
        let err = builder().build("i1", &request, &HashSet::new());
        assert!(matches!(err, Err(VisionKitError::NotFound(_))));
    }

    #[test]
    fn test_face_detection_build_order_and_substitution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = face_request(dir.path());

        let built = builder()
            .build("11111111-2222-3333-4444-555555555555", &request, &HashSet::new())
            .expect("build");

        // RTMP destination is elided (no RTMP_URL); order follows the recipe.
        let types: Vec<&str> = built.nodes.iter().map(|n| n.node_type()).collect();
        assert_eq!(types, vec!["file_src", "yunet_face_detector", "osd"]);

        // {instanceId} substituted into every node name.
        for node in &built.nodes {
            assert!(node.name().ends_with("11111111-2222-3333-4444-555555555555"));
        }
        assert!(built.rtmp_url.is_none());
        assert_eq!(built.bindings.len(), 3);
    }

    #[test]
    fn test_rtmp_collision_within_and_across_builds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut request = face_request(dir.path());
        request
            .additional_params
            .insert("RTMP_URL".to_string(), "rtmp://host/app/stream_1".to_string());

        // External collision: the key is already used by a sibling.
        let mut existing = HashSet::new();
        existing.insert("stream_1".to_string());

        let built = builder()
            .build("abcdef12-3456-7890-aaaa-bbbbbbbbbbbb", &request, &existing)
            .expect("build");
        assert_eq!(
            built.rtmp_url.as_deref(),
            Some("rtmp://host/app/stream_1_abcdef12")
        );

        // No collision: URL preserved verbatim.
        let built = builder()
            .build("abcdef12-3456-7890-aaaa-bbbbbbbbbbbb", &request, &HashSet::new())
            .expect("build");
        assert_eq!(built.rtmp_url.as_deref(), Some("rtmp://host/app/stream_1"));
    }

    #[test]
    fn test_path_rewrites() {
        assert_eq!(
            convert_path_to_production("./cvedix_data/test_video/face.mp4"),
            "/opt/edge_ai_api/videos/face.mp4"
        );
        assert_eq!(
            convert_path_to_production("cvedix_data/models/face/yunet.onnx"),
            "/opt/edge_ai_api/models/face/yunet.onnx"
        );
        assert_eq!(convert_path_to_production("/data/already/abs.mp4"), "/data/already/abs.mp4");
    }

    #[test]
    fn test_placeholder_on_required_source_slot_aborts() {
        // file_src's file_path has a template default, so deleting the
        // request binding alone will not abort. Use a bespoke template with
        // no default to exercise the abort path.
        let pool = Arc::new(NodePool::with_default_templates());
        pool.register_template(visionkit_core::NodeTemplate {
            template_id: "bare_src".to_string(),
            node_type: "bare_src".to_string(),
            category: visionkit_core::NodeCategory::Source,
            display_name: "Bare Source".to_string(),
            description: String::new(),
            default_parameters: BTreeMap::new(),
            required_parameters: vec!["stream_url".to_string()],
            optional_parameters: vec![],
            pre_configured: false,
        });

        let mut solutions = SolutionRegistry::new();
        solutions.register(visionkit_core::SolutionConfig {
            solution_id: "bare".to_string(),
            solution_name: "Bare".to_string(),
            solution_type: "custom".to_string(),
            is_default: false,
            pipeline: vec![visionkit_core::NodeSpec {
                node_type: "bare_src".to_string(),
                node_name: "bare_src_{instanceId}".to_string(),
                parameters: [("stream_url".to_string(), "${STREAM_URL}".to_string())]
                    .into_iter()
                    .collect(),
            }],
        });

        let builder =
            PipelineBuilder::new(pool, Arc::new(solutions), Arc::new(ConfigStore::new()));
        let request = CreateInstanceRequest::new("t", "bare");
        let err = builder.build("i1", &request, &HashSet::new());
        assert!(matches!(err, Err(VisionKitError::InvalidArgument(_))));
    }

    #[test]
    fn test_broker_with_unresolved_url_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let weights = dir.path().join("y.weights");
        let cfg = dir.path().join("y.cfg");
        let labels = dir.path().join("y.txt");
        let video = dir.path().join("v.mp4");
        for f in [&weights, &cfg, &labels, &video] {
            write_file(f);
        }

        let mut request = CreateInstanceRequest::new("t", "ba_crossline_mqtt_default");
        request
            .additional_params
            .insert("FILE_PATH".to_string(), video.to_string_lossy().into_owned());
        request
            .additional_params
            .insert("WEIGHTS_PATH".to_string(), weights.to_string_lossy().into_owned());
        request
            .additional_params
            .insert("CONFIG_PATH".to_string(), cfg.to_string_lossy().into_owned());
        request
            .additional_params
            .insert("LABELS_PATH".to_string(), labels.to_string_lossy().into_owned());
        // No MQTT_BROKER_URL: the broker drops out, the rest builds.

        let built = builder().build("i1", &request, &HashSet::new()).expect("build");
        assert!(built.nodes.iter().all(|n| n.node_type() != "mqtt_broker"));
        assert!(built.nodes.iter().any(|n| n.node_type() == "ba_crossline"));
    }
}
