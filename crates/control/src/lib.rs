// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! visionkit-control: instance lifecycle orchestration.
//!
//! [`manager::InstanceManager`] owns create/update/delete/start/stop with
//! admission control; [`securt::SecuRTManager`] is the domain facade with
//! sensitivity/modality knobs and [`entities`] the analytics line/area
//! collections that drive in-place updates and rebuilds.

pub mod entities;
pub mod manager;
pub mod quick;
pub mod registry;
pub mod securt;

pub use entities::{Area, AreaKind, Direction, EntitySetState, EntityStore, Line, LineKind, Point};
pub use manager::{EntityApplyOutcome, InstanceManager};
pub use quick::QuickCreateParams;
pub use registry::{InstanceRecord, InstanceRegistry, InstanceUpdate};
pub use securt::{SecuRTInstance, SecuRTInstanceWrite, SecuRTManager, SecuRTRegistry};
