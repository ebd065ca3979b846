// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Opaque node handle abstraction.
//!
//! The control plane never inspects node internals. A [`PipelineNode`] is an
//! addressable handle with lifecycle methods; the underlying video/inference
//! runtime is a black box reachable only through this trait.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The functional group a node type belongs to. Drives factory dispatch and
/// the elision rules in the pipeline builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Source,
    Detector,
    Processor,
    Destination,
    Broker,
    Other,
}

impl NodeCategory {
    /// Parses the category labels used by templates and the HTTP surface.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(Self::Source),
            "detector" => Some(Self::Detector),
            "processor" => Some(Self::Processor),
            "destination" => Some(Self::Destination),
            "broker" => Some(Self::Broker),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Detector => "detector",
            Self::Processor => "processor",
            Self::Destination => "destination",
            Self::Broker => "broker",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live, addressable processing node owned by exactly one instance graph.
///
/// Implementations wrap the runtime objects handed out by the pipeline
/// engine. Lifecycle methods are idempotent: `start` on a started node and
/// `stop` on a stopped node are no-ops.
pub trait PipelineNode: Send + Sync {
    /// The name the engine uses to address this node within its graph.
    fn name(&self) -> &str;

    /// The node type discriminant (e.g. `rtsp_src`, `yunet_face_detector`).
    fn node_type(&self) -> &str;

    fn category(&self) -> NodeCategory;

    /// Begins processing. May block briefly on runtime setup.
    fn start(&self) -> Result<()>;

    /// Halts processing, retaining configuration so the node can be
    /// restarted.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// Releases the node's runtime resources. The default halts processing;
    /// nodes holding external connections override this.
    fn destroy(&self) {
        self.stop();
    }

    /// The external endpoint this node reads from or publishes to, when it
    /// has one (the possibly-uniqued RTMP URL for an RTMP destination).
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Pushes a configuration change into the running node without a graph
    /// rebuild. Returns `Ok(false)` when this node cannot apply the change
    /// in place, in which case the caller must rebuild.
    fn apply_update(&self, params: &BTreeMap<String, String>) -> Result<bool> {
        let _ = params;
        Ok(false)
    }
}

/// Shared, read-only reference to a node. The Node Pool (or the owning
/// instance) holds the authoritative record; graphs hold these.
pub type NodeHandle = Arc<dyn PipelineNode>;
