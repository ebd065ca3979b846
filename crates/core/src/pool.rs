// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node pool.
//!
//! Owns the template registry and the set of pre-configured nodes (a template
//! bound to a concrete parameter set, reusable across instances while not in
//! use). Readers may overlap; any mutation takes the exclusive side of the
//! lock.

use crate::error::{Result, VisionKitError};
use crate::solution::{NodeSpec, SolutionConfig, SolutionRegistry};
use crate::template::{NodeTemplate, TemplateRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

/// Returns true when a parameter value is an unresolved `${TOKEN}`
/// placeholder left over from solution substitution.
pub fn is_placeholder(value: &str) -> bool {
    value.starts_with("${") && value.ends_with('}')
}

/// A template bound to a parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreConfiguredNode {
    pub node_id: String,
    pub template_id: String,
    /// Template defaults merged under user overrides (overrides win).
    pub parameters: BTreeMap<String, String>,
    pub in_use: bool,
    pub created_at: SystemTime,
}

/// Aggregate counts for the pool surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_templates: usize,
    pub total_nodes: usize,
    pub available_nodes: usize,
    pub in_use_nodes: usize,
    pub nodes_by_category: BTreeMap<String, usize>,
}

struct PoolInner {
    templates: TemplateRegistry,
    nodes: HashMap<String, PreConfiguredNode>,
}

/// Thread-safe owner of templates and pre-configured nodes.
pub struct NodePool {
    inner: RwLock<PoolInner>,
}

impl NodePool {
    pub fn new(templates: TemplateRegistry) -> Self {
        Self { inner: RwLock::new(PoolInner { templates, nodes: HashMap::new() }) }
    }

    /// Pool seeded with the built-in template catalogue.
    pub fn with_default_templates() -> Self {
        Self::new(TemplateRegistry::with_defaults())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PoolInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PoolInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- templates ---

    /// Registers a template; false without mutation when the id exists.
    pub fn register_template(&self, template: NodeTemplate) -> bool {
        self.write().templates.register(template)
    }

    pub fn get_template(&self, template_id: &str) -> Option<NodeTemplate> {
        self.read().templates.get(template_id).cloned()
    }

    pub fn templates(&self) -> Vec<NodeTemplate> {
        self.read().templates.list()
    }

    pub fn templates_by_category(&self, category: crate::node::NodeCategory) -> Vec<NodeTemplate> {
        self.read().templates.list_by_category(category)
    }

    pub fn template_count(&self) -> usize {
        self.read().templates.len()
    }

    // --- pre-configured nodes ---

    /// Creates a pre-configured node from a template. Parameters are the
    /// template defaults merged under `overrides` (overrides win); every
    /// required parameter must be present after the merge.
    pub fn create(
        &self,
        template_id: &str,
        overrides: BTreeMap<String, String>,
    ) -> Result<String> {
        let mut inner = self.write();

        let template = inner
            .templates
            .get(template_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("template '{template_id}'")))?
            .clone();

        let mut parameters = template.default_parameters.clone();
        parameters.extend(overrides);

        for required in &template.required_parameters {
            match parameters.get(required) {
                Some(value) if !value.is_empty() && !is_placeholder(value) => {},
                _ => {
                    return Err(VisionKitError::InvalidArgument(format!(
                        "missing required parameter '{required}' for template '{template_id}'"
                    )));
                },
            }
        }

        let node_id = format!("node_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        inner.nodes.insert(
            node_id.clone(),
            PreConfiguredNode {
                node_id: node_id.clone(),
                template_id: template_id.to_string(),
                parameters,
                in_use: false,
                created_at: SystemTime::now(),
            },
        );
        tracing::info!(node_id = %node_id, template_id = %template_id, "Created pre-configured node");
        Ok(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<PreConfiguredNode> {
        self.read().nodes.get(node_id).cloned()
    }

    pub fn list(&self) -> Vec<PreConfiguredNode> {
        let mut all: Vec<PreConfiguredNode> = self.read().nodes.values().cloned().collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    pub fn available(&self) -> Vec<PreConfiguredNode> {
        self.list().into_iter().filter(|n| !n.in_use).collect()
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Flips the in-use flag on. Rejects nodes that are already in use.
    pub fn mark_in_use(&self, node_id: &str) -> bool {
        let mut inner = self.write();
        match inner.nodes.get_mut(node_id) {
            Some(node) if !node.in_use => {
                node.in_use = true;
                true
            },
            _ => false,
        }
    }

    /// Flips the in-use flag off. Rejects nodes that are already available.
    pub fn mark_available(&self, node_id: &str) -> bool {
        let mut inner = self.write();
        match inner.nodes.get_mut(node_id) {
            Some(node) if node.in_use => {
                node.in_use = false;
                true
            },
            _ => false,
        }
    }

    /// Removes a node. In-use nodes are rejected and remain retrievable.
    pub fn remove(&self, node_id: &str) -> bool {
        let mut inner = self.write();
        match inner.nodes.get(node_id) {
            Some(node) if node.in_use => {
                tracing::warn!(node_id = %node_id, "Refusing to remove node that is in use");
                false
            },
            Some(_) => {
                inner.nodes.remove(node_id);
                true
            },
            None => false,
        }
    }

    /// Overwrites a node's parameters (template defaults re-applied under
    /// the new values). Rejects in-use nodes.
    pub fn update_parameters(
        &self,
        node_id: &str,
        overrides: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.write();

        let template_id = match inner.nodes.get(node_id) {
            Some(node) if node.in_use => {
                return Err(VisionKitError::Conflict(format!("node '{node_id}' is in use")));
            },
            Some(node) => node.template_id.clone(),
            None => return Err(VisionKitError::NotFound(format!("node '{node_id}'"))),
        };

        let defaults = inner
            .templates
            .get(&template_id)
            .map(|t| t.default_parameters.clone())
            .unwrap_or_default();

        if let Some(node) = inner.nodes.get_mut(node_id) {
            let mut parameters = defaults;
            parameters.extend(overrides);
            node.parameters = parameters;
        }
        Ok(())
    }

    /// Materialises a solution whose pipeline mirrors the supplied node ids,
    /// in order. Returns `None` on any missing node or template.
    pub fn build_solution_from_nodes(
        &self,
        node_ids: &[String],
        solution_id: &str,
        solution_name: &str,
    ) -> Option<SolutionConfig> {
        let inner = self.read();
        let mut pipeline = Vec::with_capacity(node_ids.len());

        for node_id in node_ids {
            let node = inner.nodes.get(node_id)?;
            let template = inner.templates.get(&node.template_id)?;
            pipeline.push(NodeSpec {
                node_type: template.node_type.clone(),
                node_name: format!("{}_{{instanceId}}", template.node_type),
                parameters: node.parameters.clone(),
            });
        }

        Some(SolutionConfig {
            solution_id: solution_id.to_string(),
            solution_name: solution_name.to_string(),
            solution_type: "custom".to_string(),
            is_default: false,
            pipeline,
        })
    }

    /// Seeds pre-configured nodes for every node type referenced by the
    /// default solutions that does not already have one.
    ///
    /// Placeholder policy: a solution parameter whose value is still of the
    /// shape `${TOKEN}` is first replaced with the template default for that
    /// slot; if none exists and the slot is required, the node is skipped
    /// with a warning.
    pub fn create_nodes_from_default_solutions(&self, solutions: &SolutionRegistry) -> usize {
        let mut created = 0;

        for solution in solutions.default_solutions() {
            for step in &solution.pipeline {
                let default_id = format!("node_{}_default", step.node_type);
                {
                    let inner = self.read();
                    if inner.nodes.contains_key(&default_id) {
                        continue;
                    }
                }

                let Some(template) = self.get_template(&step.node_type) else {
                    tracing::warn!(
                        node_type = %step.node_type,
                        solution_id = %solution.solution_id,
                        "No template for node type referenced by default solution"
                    );
                    continue;
                };

                match resolve_seed_parameters(&template, &step.parameters) {
                    Some(parameters) => {
                        let mut inner = self.write();
                        if inner.nodes.contains_key(&default_id) {
                            continue;
                        }
                        inner.nodes.insert(
                            default_id.clone(),
                            PreConfiguredNode {
                                node_id: default_id,
                                template_id: template.template_id.clone(),
                                parameters,
                                in_use: false,
                                created_at: SystemTime::now(),
                            },
                        );
                        created += 1;
                    },
                    None => {
                        tracing::warn!(
                            node_type = %step.node_type,
                            solution_id = %solution.solution_id,
                            "Skipping default node: unresolved placeholder on a required slot"
                        );
                    },
                }
            }
        }

        tracing::info!(created, "Seeded pre-configured nodes from default solutions");
        created
    }

    /// Inserts an externally-sourced record (storage load). Existing ids are
    /// left untouched; returns true when the record was added.
    pub fn insert_loaded(&self, node: PreConfiguredNode) -> bool {
        let mut inner = self.write();
        if inner.nodes.contains_key(&node.node_id) {
            return false;
        }
        inner.nodes.insert(node.node_id.clone(), node);
        true
    }

    pub fn get_stats(&self) -> PoolStats {
        let inner = self.read();
        let in_use = inner.nodes.values().filter(|n| n.in_use).count();

        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        for node in inner.nodes.values() {
            if let Some(template) = inner.templates.get(&node.template_id) {
                *by_category.entry(template.category.to_string()).or_insert(0) += 1;
            }
        }

        PoolStats {
            total_templates: inner.templates.len(),
            total_nodes: inner.nodes.len(),
            available_nodes: inner.nodes.len() - in_use,
            in_use_nodes: in_use,
            nodes_by_category: by_category,
        }
    }
}

/// Resolves the parameter set for a seeded default node, or `None` when a
/// required slot is left with an unresolved placeholder.
fn resolve_seed_parameters(
    template: &NodeTemplate,
    spec_parameters: &BTreeMap<String, String>,
) -> Option<BTreeMap<String, String>> {
    let mut parameters = template.default_parameters.clone();

    for (key, value) in spec_parameters {
        if is_placeholder(value) {
            match template.default_parameters.get(key) {
                Some(default) => {
                    parameters.insert(key.clone(), default.clone());
                },
                None if template.required_parameters.contains(key) => return None,
                None => {
                    // Optional slot with residue: drop it, the factory default
                    // applies.
                },
            }
        } else {
            parameters.insert(key.clone(), value.clone());
        }
    }

    for required in &template.required_parameters {
        match parameters.get(required) {
            Some(v) if !v.is_empty() && !is_placeholder(v) => {},
            _ => return None,
        }
    }

    Some(parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeCategory;

    fn pool() -> NodePool {
        NodePool::with_default_templates()
    }

    #[test]
    fn test_create_merges_defaults_under_overrides() {
        let pool = pool();
        let mut overrides = BTreeMap::new();
        overrides.insert("file_path".to_string(), "/data/cam1.mp4".to_string());

        let node_id = pool.create("file_src", overrides).expect("create");
        let node = pool.get(&node_id).expect("node");
        assert_eq!(node.parameters.get("file_path").map(String::as_str), Some("/data/cam1.mp4"));
        // Default retained where not overridden.
        assert_eq!(node.parameters.get("resize_ratio").map(String::as_str), Some("1.0"));
    }

    #[test]
    fn test_create_rejects_missing_template_and_required_param() {
        let pool = pool();
        assert!(matches!(
            pool.create("no_such_template", BTreeMap::new()),
            Err(VisionKitError::NotFound(_))
        ));
        // rtmp_des requires rtmp_url and has no default for it.
        assert!(matches!(
            pool.create("rtmp_des", BTreeMap::new()),
            Err(VisionKitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_in_use_invariant() {
        let pool = pool();
        let node_id = pool.create("file_src", BTreeMap::new()).expect("create");

        assert!(pool.mark_in_use(&node_id));
        assert!(!pool.mark_in_use(&node_id), "double mark must be rejected");

        assert!(!pool.remove(&node_id), "in-use node must not be removable");
        assert!(pool.get(&node_id).is_some(), "record must remain retrievable");

        assert!(pool.mark_available(&node_id));
        assert!(!pool.mark_available(&node_id));
        assert!(pool.remove(&node_id));
        assert!(pool.get(&node_id).is_none());
    }

    #[test]
    fn test_placeholder_skip_rule() {
        let pool = pool();
        // Template whose required parameter has no default.
        pool.register_template(crate::template::NodeTemplate {
            template_id: "needs_input".to_string(),
            node_type: "needs_input".to_string(),
            category: NodeCategory::Source,
            display_name: "Needs Input".to_string(),
            description: String::new(),
            default_parameters: BTreeMap::new(),
            required_parameters: vec!["endpoint".to_string()],
            optional_parameters: vec![],
            pre_configured: false,
        });

        let mut solutions = SolutionRegistry::new();
        solutions.register(SolutionConfig {
            solution_id: "mixed".to_string(),
            solution_name: "Mixed".to_string(),
            solution_type: "custom".to_string(),
            is_default: true,
            pipeline: vec![
                NodeSpec {
                    node_type: "needs_input".to_string(),
                    node_name: "needs_input_{instanceId}".to_string(),
                    parameters: [("endpoint".to_string(), "${MISSING}".to_string())]
                        .into_iter()
                        .collect(),
                },
                NodeSpec {
                    node_type: "file_src".to_string(),
                    node_name: "file_src_{instanceId}".to_string(),
                    parameters: [("file_path".to_string(), "${FILE_PATH}".to_string())]
                        .into_iter()
                        .collect(),
                },
            ],
        });

        let created = pool.create_nodes_from_default_solutions(&solutions);
        assert_eq!(created, 1, "only the resolvable node is created");
        assert!(pool.get("node_file_src_default").is_some());
        assert!(pool.get("node_needs_input_default").is_none());
    }

    #[test]
    fn test_seed_is_idempotent() {
        let pool = pool();
        let solutions = SolutionRegistry::with_defaults();
        let first = pool.create_nodes_from_default_solutions(&solutions);
        assert!(first > 0);
        let second = pool.create_nodes_from_default_solutions(&solutions);
        assert_eq!(second, 0);
    }

    #[test]
    fn test_build_solution_from_nodes() {
        let pool = pool();
        let src = pool.create("file_src", BTreeMap::new()).expect("src");
        let det = pool.create("yunet_face_detector", BTreeMap::new()).expect("det");

        let solution = pool
            .build_solution_from_nodes(
                &[src.clone(), det],
                "custom_face",
                "Custom Face Pipeline",
            )
            .expect("solution");
        assert_eq!(solution.pipeline.len(), 2);
        assert_eq!(solution.pipeline[0].node_type, "file_src");
        assert_eq!(solution.pipeline[1].node_type, "yunet_face_detector");

        // Any missing id yields None.
        assert!(pool
            .build_solution_from_nodes(&[src, "node_missing".to_string()], "x", "x")
            .is_none());
    }

    #[test]
    fn test_stats_by_category() {
        let pool = pool();
        pool.create("file_src", BTreeMap::new()).expect("src");
        pool.create("console_broker", BTreeMap::new()).expect("broker");

        let stats = pool.get_stats();
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.available_nodes, 2);
        assert_eq!(stats.nodes_by_category.get("source"), Some(&1));
        assert_eq!(stats.nodes_by_category.get("broker"), Some(&1));
    }

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder("${FILE_PATH}"));
        assert!(!is_placeholder("/opt/edge_ai_api/videos/face.mp4"));
        assert!(!is_placeholder("{instanceId}"));
    }
}
