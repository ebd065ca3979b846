// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Source node constructors: file, RTSP, RTMP, UDP, HLS and application
//! sources.
//!
//! Sources own the decode-side knobs: the resize ratio (clamped to `(0, 1]`),
//! the decoder chosen from the configured priority list and the forced RTSP
//! transport.

use crate::base::{parse_f32, NodeBase};
use crate::factory::FactoryContext;
use std::collections::BTreeMap;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::node::{NodeCategory, NodeHandle, PipelineNode};
use visionkit_core::{is_placeholder, platform};

/// Maps decoder priority tags from the config store to concrete decoder
/// identifiers. First tag with a mapping wins.
const DECODER_MAP: &[(&str, &str)] = &[
    ("blaize.auto", "avdec_h264"),
    ("rockchip", "mppvideodec"),
    ("nvidia.1", "nvh264dec"),
    ("intel.1", "qsvh264dec"),
    ("software", "avdec_h264"),
];

/// Hardware decoder per detected platform label, matching the platforms the
/// config store carries decode pipelines for.
const PLATFORM_DECODER_MAP: &[(&str, &str)] = &[
    ("jetson", "nvv4l2decoder"),
    ("nvidia", "nvh264dec"),
    ("msdk", "qsvh264dec"),
    ("vaapi", "vaapih264dec"),
];

/// Software H.264 fallback when the priority list yields nothing.
pub const DEFAULT_DECODER: &str = "avdec_h264";

// Configuration fields are consumed by the media runtime through the engine
// seam, not by the control plane itself.
#[allow(dead_code)]
pub(crate) struct SourceNode {
    base: NodeBase,
    endpoint: String,
    resize_ratio: f32,
    decoder: Option<String>,
}

impl PipelineNode for SourceNode {
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
        if self.base.set_running() {
            tracing::debug!(node = %self.base.name(), "Source node started");
        }
        Ok(())
    }

    fn stop(&self) {
        if self.base.set_stopped() {
            tracing::debug!(node = %self.base.name(), "Source node stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.base.is_running()
    }

    fn endpoint(&self) -> Option<&str> {
        if self.endpoint.is_empty() {
            None
        } else {
            Some(&self.endpoint)
        }
    }

    fn apply_update(&self, params: &BTreeMap<String, String>) -> Result<bool> {
        // Endpoint or decode changes need a rebuild; nothing here is
        // runtime-tunable.
        let _ = params;
        Ok(false)
    }
}

/// Resolves the resize ratio with the documented precedence:
/// request `RESIZE_RATIO` > parameter `resize_ratio` > `default`.
///
/// A well-formed value outside `(0, 1]` is a hard error; placeholder residue
/// or a malformed value falls back to the clamped default with a warning.
pub(crate) fn resolve_resize_ratio(
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
    default: f32,
) -> Result<f32> {
    let candidate = ctx
        .request
        .param("RESIZE_RATIO")
        .or_else(|| params.get("resize_ratio").map(String::as_str));

    let Some(raw) = candidate else {
        return Ok(default);
    };

    if is_placeholder(raw) {
        tracing::warn!(value = %raw, default, "Unresolved resize ratio placeholder, using default");
        return Ok(default.clamp(f32::MIN_POSITIVE, 1.0));
    }

    match parse_f32(raw) {
        Some(ratio) if ratio > 0.0 && ratio <= 1.0 => Ok(ratio),
        Some(ratio) => Err(VisionKitError::InvalidArgument(format!(
            "resize_ratio {ratio} out of range (0, 1]"
        ))),
        None => {
            tracing::warn!(value = %raw, default, "Malformed resize ratio, using default");
            Ok(default)
        },
    }
}

/// Chooses the decoder with the documented precedence: request
/// `GST_DECODER_NAME` > parameter `gst_decoder_name` > hardware decoder of
/// the probed platform > first mapped tag of the configured priority list >
/// software fallback.
pub(crate) fn select_decoder(
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> String {
    select_decoder_for(platform::detect_platform(), params, ctx)
}

/// Decoder selection against an explicit platform label (the probe is a
/// process-wide cache, so tests pass the label directly).
pub(crate) fn select_decoder_for(
    detected_platform: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> String {
    if let Some(name) = ctx.request.param("GST_DECODER_NAME") {
        return name.to_string();
    }
    if let Some(name) = params.get("gst_decoder_name").filter(|v| !v.is_empty() && !is_placeholder(v)) {
        return name.clone();
    }

    // The probed platform wins over the generic priority list, as long as
    // the config still carries a decode pipeline for it.
    if let Some((_, decoder)) =
        PLATFORM_DECODER_MAP.iter().find(|(p, _)| *p == detected_platform)
    {
        let pipeline_key = format!("gstreamer.decode_pipelines.{detected_platform}");
        if ctx.config.get(&pipeline_key).is_ok() {
            tracing::info!(
                platform = %detected_platform,
                decoder = %decoder,
                "Selected decoder for detected platform"
            );
            return (*decoder).to_string();
        }
        tracing::debug!(
            platform = %detected_platform,
            "No decode pipeline configured for detected platform, using priority list"
        );
    }

    for tag in ctx.config.decoder_priority_list() {
        if let Some((_, decoder)) = DECODER_MAP.iter().find(|(t, _)| *t == tag) {
            tracing::debug!(tag = %tag, decoder = %decoder, "Selected decoder from priority list");
            return (*decoder).to_string();
        }
    }
    DEFAULT_DECODER.to_string()
}

/// Applies the forced RTSP transport, if any. Request `RTSP_TRANSPORT` wins
/// over an existing `GST_RTSP_PROTOCOLS`; both accept `tcp` or `udp`. Unset
/// means the engine default.
pub(crate) fn apply_rtsp_transport(params: &BTreeMap<String, String>, ctx: &FactoryContext<'_>) {
    let requested = ctx
        .request
        .param("RTSP_TRANSPORT")
        .map(str::to_lowercase)
        .or_else(|| params.get("rtsp_transport").map(|v| v.to_lowercase()))
        .or_else(|| std::env::var("GST_RTSP_PROTOCOLS").ok().map(|v| v.to_lowercase()));

    match requested.as_deref() {
        Some(transport @ ("tcp" | "udp")) => {
            std::env::set_var("GST_RTSP_PROTOCOLS", transport);
            tracing::info!(transport, "Forcing RTSP transport");
        },
        Some(other) => {
            tracing::warn!(value = %other, "Ignoring invalid RTSP transport");
        },
        None => {},
    }
}

/// Seeds conservative GStreamer RTSP tuning defaults for variables the
/// operator has not set.
pub(crate) fn apply_gst_tuning_defaults() {
    const DEFAULTS: &[(&str, &str)] = &[
        ("GST_RTSP_BUFFER_MODE", "1"),
        ("GST_RTSP_BUFFER_SIZE", "10485760"),
        ("GST_RTSP_TIMEOUT", "10000000000"),
        ("GST_RTSP_DROP_ON_LATENCY", "true"),
        ("GST_RTSP_LATENCY", "2000000000"),
    ];
    for (key, value) in DEFAULTS {
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
            tracing::debug!(key, value, "Set GStreamer tuning default");
        }
    }
}

/// Endpoint precedence: request binding > recipe parameter > process
/// environment (the `RTSP_URL`/`RTMP_URL`-family default stream endpoints).
fn required_endpoint(
    params: &BTreeMap<String, String>,
    request_keys: &[&str],
    param_key: &str,
    ctx: &FactoryContext<'_>,
) -> Result<String> {
    for key in request_keys {
        if let Some(value) = ctx.request.param(key) {
            if !is_placeholder(value) {
                return Ok(value.to_string());
            }
        }
    }
    if let Some(value) = params.get(param_key) {
        if !value.is_empty() && !is_placeholder(value) {
            return Ok(value.clone());
        }
    }
    for key in request_keys {
        if let Ok(value) = std::env::var(key) {
            if !value.is_empty() {
                tracing::info!(key, value = %value, "Using default stream endpoint from environment");
                return Ok(value);
            }
        }
    }
    Err(VisionKitError::InvalidArgument(format!("missing required parameter '{param_key}'")))
}

pub(crate) fn create_file_source(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let file_path = required_endpoint(params, &["FILE_PATH"], "file_path", ctx)?;
    let resize_ratio = resolve_resize_ratio(params, ctx, 1.0)?;

    tracing::info!(node = %node_name, file_path = %file_path, resize_ratio, "Creating file source");
    Ok(std::sync::Arc::new(SourceNode {
        base: NodeBase::new(node_name, "file_src", NodeCategory::Source)?,
        endpoint: file_path,
        resize_ratio,
        decoder: None,
    }))
}

pub(crate) fn create_rtsp_source(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let rtsp_url = required_endpoint(params, &["RTSP_URL", "RTSP_SRC_URL"], "rtsp_url", ctx)?;
    let resize_ratio = resolve_resize_ratio(params, ctx, 0.6)?;
    let decoder = select_decoder(params, ctx);

    apply_rtsp_transport(params, ctx);
    apply_gst_tuning_defaults();

    tracing::info!(
        node = %node_name,
        rtsp_url = %rtsp_url,
        resize_ratio,
        decoder = %decoder,
        "Creating RTSP source"
    );
    Ok(std::sync::Arc::new(SourceNode {
        base: NodeBase::new(node_name, "rtsp_src", NodeCategory::Source)?,
        endpoint: rtsp_url,
        resize_ratio,
        decoder: Some(decoder),
    }))
}

pub(crate) fn create_rtmp_source(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let rtmp_url = required_endpoint(params, &["RTMP_SRC_URL"], "rtmp_url", ctx)?;
    let resize_ratio = resolve_resize_ratio(params, ctx, 1.0)?;

    tracing::info!(node = %node_name, rtmp_url = %rtmp_url, "Creating RTMP source");
    Ok(std::sync::Arc::new(SourceNode {
        base: NodeBase::new(node_name, "rtmp_src", NodeCategory::Source)?,
        endpoint: rtmp_url,
        resize_ratio,
        decoder: None,
    }))
}

pub(crate) fn create_udp_source(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let port = required_endpoint(params, &["UDP_PORT"], "port", ctx)?;
    port.parse::<u16>().map_err(|_| {
        VisionKitError::InvalidArgument(format!("invalid UDP port '{port}'"))
    })?;
    let resize_ratio = resolve_resize_ratio(params, ctx, 1.0)?;

    tracing::info!(node = %node_name, port = %port, "Creating UDP source");
    Ok(std::sync::Arc::new(SourceNode {
        base: NodeBase::new(node_name, "udp_src", NodeCategory::Source)?,
        endpoint: format!("udp://0.0.0.0:{port}"),
        resize_ratio,
        decoder: None,
    }))
}

pub(crate) fn create_hls_source(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let hls_url = required_endpoint(params, &["HLS_URL"], "hls_url", ctx)?;
    let resize_ratio = resolve_resize_ratio(params, ctx, 1.0)?;

    tracing::info!(node = %node_name, hls_url = %hls_url, "Creating HLS source");
    Ok(std::sync::Arc::new(SourceNode {
        base: NodeBase::new(node_name, "hls_src", NodeCategory::Source)?,
        endpoint: hls_url,
        resize_ratio,
        decoder: None,
    }))
}

pub(crate) fn create_app_source(
    node_name: &str,
    params: &BTreeMap<String, String>,
    ctx: &FactoryContext<'_>,
) -> Result<NodeHandle> {
    let resize_ratio = resolve_resize_ratio(params, ctx, 1.0)?;

    tracing::info!(node = %node_name, "Creating application source");
    Ok(std::sync::Arc::new(SourceNode {
        base: NodeBase::new(node_name, "app_src", NodeCategory::Source)?,
        endpoint: String::new(),
        resize_ratio,
        decoder: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::FactoryContext;
    use std::collections::HashSet;
    use visionkit_core::{ConfigStore, CreateInstanceRequest};

    fn ctx<'a>(
        request: &'a CreateInstanceRequest,
        config: &'a ConfigStore,
        keys: &'a HashSet<String>,
    ) -> FactoryContext<'a> {
        FactoryContext { request, instance_id: "11111111-2222-3333-4444-555555555555", existing_rtmp_keys: keys, config }
    }

    #[test]
    fn test_resize_ratio_strict_out_of_range_is_error() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let mut params = BTreeMap::new();
        params.insert("resize_ratio".to_string(), "1.5".to_string());

        let err = resolve_resize_ratio(&params, &ctx(&request, &config, &keys), 1.0);
        assert!(matches!(err, Err(VisionKitError::InvalidArgument(_))));

        params.insert("resize_ratio".to_string(), "0".to_string());
        let err = resolve_resize_ratio(&params, &ctx(&request, &config, &keys), 1.0);
        assert!(matches!(err, Err(VisionKitError::InvalidArgument(_))));
    }

    #[test]
    fn test_resize_ratio_placeholder_residue_defaults() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let mut params = BTreeMap::new();
        params.insert("resize_ratio".to_string(), "${RESIZE_RATIO}".to_string());

        let ratio = resolve_resize_ratio(&params, &ctx(&request, &config, &keys), 0.6)
            .expect("residue falls back");
        assert!((ratio - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resize_ratio_request_wins() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request.additional_params.insert("RESIZE_RATIO".to_string(), "0.25".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let mut params = BTreeMap::new();
        params.insert("resize_ratio".to_string(), "0.9".to_string());

        let ratio = resolve_resize_ratio(&params, &ctx(&request, &config, &keys), 1.0)
            .expect("request value");
        assert!((ratio - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_decoder_from_priority_list() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        // With no platform detected, the default priority list starts at
        // blaize.auto which maps to the software decoder.
        let decoder = select_decoder_for("auto", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert_eq!(decoder, "avdec_h264");

        config
            .set_merge("", serde_json::json!({"decoder_priority_list": ["nvidia.1", "software"]}))
            .expect("set");
        let decoder = select_decoder_for("auto", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert_eq!(decoder, "nvh264dec");
    }

    #[test]
    fn test_decoder_for_detected_platform() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();

        // The probed platform beats the priority list.
        let decoder =
            select_decoder_for("jetson", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert_eq!(decoder, "nvv4l2decoder");
        let decoder =
            select_decoder_for("vaapi", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert_eq!(decoder, "vaapih264dec");

        // Without a decode pipeline configured for the platform, selection
        // falls back to the priority list.
        assert!(config.delete("gstreamer.decode_pipelines.nvidia"));
        let decoder =
            select_decoder_for("nvidia", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert_eq!(decoder, "avdec_h264");
    }

    #[test]
    fn test_decoder_request_override() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request.additional_params.insert("GST_DECODER_NAME".to_string(), "qsvh264dec".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();
        // An explicit request decoder beats even the probed platform.
        let decoder =
            select_decoder_for("jetson", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert_eq!(decoder, "qsvh264dec");
    }

    #[test]
    fn test_file_source_requires_path() {
        let request = CreateInstanceRequest::new("t", "s");
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let err = create_file_source("file_src_x", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert!(matches!(err, Err(VisionKitError::InvalidArgument(_))));
    }

    #[test]
    fn test_file_source_from_request_param() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request.additional_params.insert("FILE_PATH".to_string(), "/data/in.mp4".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();

        let node = create_file_source("file_src_x", &BTreeMap::new(), &ctx(&request, &config, &keys))
            .expect("node");
        assert_eq!(node.name(), "file_src_x");
        assert_eq!(node.node_type(), "file_src");
        assert!(!node.is_running());
        node.start().expect("start");
        assert!(node.is_running());
        node.stop();
        assert!(!node.is_running());
    }

    #[test]
    fn test_empty_node_name_rejected() {
        let mut request = CreateInstanceRequest::new("t", "s");
        request.additional_params.insert("FILE_PATH".to_string(), "/data/in.mp4".to_string());
        let config = ConfigStore::new();
        let keys = HashSet::new();
        let err = create_file_source("  ", &BTreeMap::new(), &ctx(&request, &config, &keys));
        assert!(matches!(err, Err(VisionKitError::InvalidArgument(_))));
    }
}
