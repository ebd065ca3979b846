// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Shared node state.
//!
//! Every concrete node embeds a [`NodeBase`] carrying the addressable name,
//! type discriminant and running flag. The underlying media runtime is opaque;
//! the base provides the lifecycle bookkeeping the control plane observes.

use std::sync::atomic::{AtomicBool, Ordering};
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::node::NodeCategory;

pub(crate) struct NodeBase {
    name: String,
    node_type: &'static str,
    category: NodeCategory,
    running: AtomicBool,
}

impl NodeBase {
    /// Validates the engine-facing name and builds the base.
    pub(crate) fn new(
        name: &str,
        node_type: &'static str,
        category: NodeCategory,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(VisionKitError::InvalidArgument(format!(
                "empty node name for {node_type}"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            node_type,
            category,
            running: AtomicBool::new(false),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) const fn node_type(&self) -> &'static str {
        self.node_type
    }

    pub(crate) const fn category(&self) -> NodeCategory {
        self.category
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Idempotent start transition. Returns true when the node was stopped.
    pub(crate) fn set_running(&self) -> bool {
        !self.running.swap(true, Ordering::Relaxed)
    }

    /// Idempotent stop transition.
    pub(crate) fn set_stopped(&self) -> bool {
        self.running.swap(false, Ordering::Relaxed)
    }
}

/// Parses a float-valued parameter, distinguishing absent, malformed and
/// well-formed values.
pub(crate) fn parse_f32(value: &str) -> Option<f32> {
    value.trim().parse::<f32>().ok()
}
