// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! visionkit-engine: pipeline materialisation and graph lifecycle.
//!
//! [`builder::PipelineBuilder`] turns a solution recipe plus a create request
//! into an ordered list of node handles; [`graph::Engine`] wires the list
//! into a [`graph::GraphHandle`] whose start/stop the instance manager owns.

pub mod builder;
pub mod graph;

pub use builder::{convert_path_to_production, BuiltPipeline, PipelineBuilder};
pub use graph::{Engine, GraphHandle};
