// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Destination node constructors: file, RTMP, RTSP, screen and application
//! destinations.
//!
//! RTMP destinations dedupe their stream key against the keys already in use
//! by sibling instances. Screen destinations are elided when no display is
//! reachable.

use crate::base::NodeBase;
use crate::factory::FactoryContext;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::is_placeholder;
use visionkit_core::node::{NodeCategory, NodeHandle, PipelineNode};

pub(crate) struct DestinationNode {
    base: NodeBase,
    endpoint: String,
}

impl PipelineNode for DestinationNode {
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

    /// The (possibly uniqued) endpoint this destination publishes to.
    fn endpoint(&self) -> Option<&str> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some(&self.endpoint)
        }
    }
}

/// Extracts the stream key from an RTMP URL (`rtmp://host:port/app/key`),
/// stripping the trailing `_0` suffix the publisher appends.
pub fn extract_rtmp_stream_key(rtmp_url: &str) -> Option<String> {
    let after_scheme = rtmp_url.strip_prefix("rtmp://").unwrap_or(rtmp_url);
    let last_slash = after_scheme.rfind('/')?;
    let mut key = &after_scheme[last_slash + 1..];
    if key.is_empty() {
        return None;
    }
    if key.len() >= 2 && key.ends_with("_0") {
        key = &key[..key.len() - 2];
    }
    Some(key.to_string())
}

/// Returns a publishable RTMP URL whose stream key does not collide with
/// `existing_keys`. On a collision the first eight characters of the
/// instance id are appended to the key; otherwise the URL is preserved
/// verbatim.
pub fn unique_rtmp_url(
    rtmp_url: &str,
    existing_keys: &HashSet<String>,
    instance_id: &str,
) -> String {
    let Some(key) = extract_rtmp_stream_key(rtmp_url) else {
        return rtmp_url.to_string();
    };

    if !existing_keys.contains(&key) {
        tracing::debug!(stream_key = %key, "RTMP stream key has no conflicts");
        return rtmp_url.to_string();
    }

    let short_id: String = instance_id.chars().filter(|c| *c != '-').take(8).collect();
    let base = rtmp_url.strip_suffix("_0").unwrap_or(rtmp_url);
    let unique = format!("{base}_{short_id}");
    tracing::warn!(
        stream_key = %key,
        unique_url = %unique,
        "RTMP stream key collides with an existing instance, appending instance id"
    );
    unique
}

pub(crate) fn create_file_destination(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    let output_dir = ctx
        .request
        .param("OUTPUT_DIR")
        .map(str::to_string)
        .or_else(|| {
            params.get("output_dir").filter(|v| !v.is_empty() && !is_placeholder(v)).cloned()
        })
        .ok_or_else(|| {
            VisionKitError::InvalidArgument("missing required parameter 'output_dir'".to_string())
        })?;

    // Pre-create the output directory so recording can start immediately.
    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        tracing::warn!(dir = %output_dir, error = %e, "Could not pre-create output directory");
    }

    tracing::info!(node = %node_name, output_dir = %output_dir, "Creating file destination");
    Ok(Some(std::sync::Arc::new(DestinationNode {
        base: NodeBase::new(node_name, "file_des", NodeCategory::Destination)?,
        endpoint: output_dir,
    })))
}

pub(crate) fn create_rtmp_destination(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    let rtmp_url = ctx
        .request
        .param("RTMP_DES_URL")
        .or_else(|| ctx.request.param("RTMP_URL"))
        .map(str::to_string)
        .or_else(|| {
            params.get("rtmp_url").filter(|v| !v.is_empty() && !is_placeholder(v)).cloned()
        })
        .or_else(|| {
            // Default stream endpoint from the process environment.
            ["RTMP_DES_URL", "RTMP_URL"]
                .iter()
                .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        });

    // No URL configured: the destination drops out of the graph silently.
    let Some(rtmp_url) = rtmp_url else {
        tracing::info!(node = %node_name, "RTMP destination elided: no RTMP URL configured");
        return Ok(None);
    };

    let publish_url = unique_rtmp_url(&rtmp_url, ctx.existing_rtmp_keys, ctx.instance_id);
    tracing::info!(node = %node_name, url = %publish_url, "Creating RTMP destination");
    Ok(Some(std::sync::Arc::new(DestinationNode {
        base: NodeBase::new(node_name, "rtmp_des", NodeCategory::Destination)?,
        endpoint: publish_url,
    })))
}

pub(crate) fn create_rtsp_destination(
    node_name: &str,
    params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    let path = params
        .get("path")
        .filter(|v| !v.is_empty() && !is_placeholder(v))
        .cloned()
        .unwrap_or_else(|| "/stream".to_string());
    let port = params
        .get("port")
        .filter(|v| !v.is_empty() && !is_placeholder(v))
        .cloned()
        .unwrap_or_else(|| "8554".to_string());

    tracing::info!(node = %node_name, path = %path, port = %port, "Creating RTSP destination");
    Ok(Some(std::sync::Arc::new(DestinationNode {
        base: NodeBase::new(node_name, "rtsp_des", NodeCategory::Destination)?,
        endpoint: format!("rtsp://0.0.0.0:{port}{path}"),
    })))
}

/// Screen output requires a reachable display server.
fn display_reachable() -> bool {
    let has = |key: &str| std::env::var(key).is_ok_and(|v| !v.is_empty());
    has("DISPLAY") || has("WAYLAND_DISPLAY")
}

pub(crate) fn create_screen_destination(
    node_name: &str,
    _params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    if !display_reachable() {
        tracing::warn!(
            node = %node_name,
            "Screen destination elided: no DISPLAY or WAYLAND_DISPLAY set"
        );
        return Ok(None);
    }

    tracing::info!(node = %node_name, "Creating screen destination");
    Ok(Some(std::sync::Arc::new(DestinationNode {
        base: NodeBase::new(node_name, "screen_des", NodeCategory::Destination)?,
        endpoint: String::new(),
    })))
}

pub(crate) fn create_app_destination(
    node_name: &str,
    _params: &BTreeMap<String, String>,
    _ctx: &FactoryContext<'_>,
) -> Result<Option<NodeHandle>> {
    tracing::info!(node = %node_name, "Creating application destination");
    Ok(Some(std::sync::Arc::new(DestinationNode {
        base: NodeBase::new(node_name, "app_des", NodeCategory::Destination)?,
        endpoint: String::new(),
    })))
}
