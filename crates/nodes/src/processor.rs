// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Processor node constructors: tracker, on-screen display and crossline
//! analytics.

use crate::base::NodeBase;
use crate::factory::FactoryContext;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use visionkit_core::error::Result;
use visionkit_core::is_placeholder;
use visionkit_core::models::PRODUCTION_ROOT;
use visionkit_core::node::{NodeCategory, NodeHandle, PipelineNode};

/// Production default overlay font.
const DEFAULT_FONT: &str = "/opt/edge_ai_api/fonts/NotoSansCJKsc-Medium.otf";

// Configuration fields are consumed by the media runtime through the engine
// seam, not by the control plane itself.
#[allow(dead_code)]
pub(crate) struct ProcessorNode {
    base: NodeBase,
    settings: Mutex<BTreeMap<String, String>>,
    /// Parameter keys this node can re-apply to a running graph.
    runtime_tunable: &'static [&'static str],
}

impl PipelineNode for ProcessorNode {
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
        if !params.keys().all(|k| self.runtime_tunable.contains(&k.as_str())) {
            return Ok(false);
        }
        let mut settings = self.settings.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (key, value) in params {
            settings.insert(key.clone(), value.clone());
        }
        tracing::debug!(node = %self.base.name(), count = params.len(), "Applied in-place update");
        Ok(true)
    }
}

pub(crate) fn create_sort_tracker(
    node_name: &str,
    params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    tracing::info!(node = %node_name, "Creating SORT tracker");
    Ok(std::sync::Arc::new(ProcessorNode {
        base: NodeBase::new(node_name, "sort_tracker", NodeCategory::Processor)?,
        settings: Mutex::new(params.clone()),
        runtime_tunable: &["max_age", "min_hits"],
    }))
}

/// Font cascade: request `FONT_PATH` > parameter `font_path` > production
/// default > environment default > empty (engine default). A chosen font
/// that does not exist on disk falls back down the chain; the engine retries
/// once with the empty fallback on load failure.
pub(crate) fn resolve_font_path(
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> String {
    if let Some(font) = ctx.request.param("FONT_PATH") {
        return font.to_string();
    }

    if let Some(font) = params.get("font_path").filter(|v| !v.is_empty() && !is_placeholder(v)) {
        if Path::new(font).exists() {
            return font.clone();
        }
        // Relative references may live under the production root.
        let resolved = Path::new(PRODUCTION_ROOT).join(font);
        if resolved.exists() {
            return resolved.to_string_lossy().into_owned();
        }
        tracing::warn!(font = %font, "Configured font not found, falling back");
    }

    if Path::new(DEFAULT_FONT).exists() {
        return DEFAULT_FONT.to_string();
    }

    if let Ok(font) = std::env::var("CVEDIX_FONT_PATH") {
        if !font.is_empty() && Path::new(&font).exists() {
            return font;
        }
    }

    String::new()
}

pub(crate) fn create_osd(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let font_path = resolve_font_path(params, ctx);
    if font_path.is_empty() {
        tracing::info!(node = %node_name, "Creating OSD node with engine default font");
    } else {
        tracing::info!(node = %node_name, font = %font_path, "Creating OSD node");
    }

    let mut settings = params.clone();
    settings.insert("font_path".to_string(), font_path);

    Ok(std::sync::Arc::new(ProcessorNode {
        base: NodeBase::new(node_name, "osd", NodeCategory::Processor)?,
        settings: Mutex::new(settings),
        runtime_tunable: &["line_width"],
    }))
}

pub(crate) fn create_crossline(
    node_name: &str,
    params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    // Unset or placeholder coordinates leave the node with its built-in
    // default line; lines pushed later through the analytics entity API
    // arrive via apply_update.
    let mut settings = BTreeMap::new();
    for (key, value) in params {
        if !is_placeholder(value) {
            settings.insert(key.clone(), value.clone());
        }
    }

    tracing::info!(node = %node_name, lines = settings.len() / 4, "Creating crossline analytics node");
    Ok(std::sync::Arc::new(ProcessorNode {
        base: NodeBase::new(node_name, "ba_crossline", NodeCategory::Processor)?,
        settings: Mutex::new(settings),
        runtime_tunable: &["start_x", "start_y", "end_x", "end_y", "lines", "areas"],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use visionkit_core::{ConfigStore, CreateInstanceRequest};

    fn fixture<'a>(
        request: &'a CreateInstanceRequest,
        config: &'a ConfigStore,
        keys: &'a HashSet<String>,
    ) -> FactoryContext<'a> {
        FactoryContext { request, instance_id: "i", existing_rtmp_keys: keys, config }
    }

    #[test]
    fn test_font_cascade_request_wins() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request.additional_params.insert("FONT_PATH".to_string(), "/fonts/custom.ttf".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();

        let mut params = BTreeMap::new();
        params.insert("font_path".to_string(), "/fonts/other.ttf".to_string());
        // Request override is taken verbatim, even unvalidated: the engine
        // retry handles load failure.
        assert_eq!(resolve_font_path(&params, &fixture(&request, &config, &keys)), "/fonts/custom.ttf");
    }

    #[test]
    fn test_font_cascade_falls_to_engine_default() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();

        let mut params = BTreeMap::new();
        params.insert("font_path".to_string(), "/definitely/missing.ttf".to_string());
        assert_eq!(resolve_font_path(&params, &fixture(&request, &config, &keys)), "");
    }

    #[test]
    fn test_crossline_applies_line_updates_in_place() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();

        let node = create_crossline("cl", &BTreeMap::new(), &fixture(&request, &config, &keys))
            .expect("node");

        let mut update = BTreeMap::new();
        update.insert("start_x".to_string(), "0".to_string());
        update.insert("start_y".to_string(), "0".to_string());
        update.insert("end_x".to_string(), "100".to_string());
        update.insert("end_y".to_string(), "100".to_string());
        assert!(node.apply_update(&update).expect("update"));

        // A non-tunable key forces a rebuild.
        let mut other = BTreeMap::new();
        other.insert("model_path".to_string(), "/m.onnx".to_string());
        assert!(!node.apply_update(&other).expect("update"));
    }

    #[test]
    fn test_crossline_drops_placeholder_coordinates() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();

        let mut params = BTreeMap::new();
        params.insert("start_x".to_string(), "${CROSSLINE_START_X}".to_string());
        let node = create_crossline("cl", &params, &fixture(&request, &config, &keys));
        assert!(node.is_ok());
    }
}
