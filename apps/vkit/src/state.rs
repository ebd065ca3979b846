// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use visionkit_control::{InstanceManager, SecuRTManager};
use visionkit_core::{ConfigStore, NodePool, NodeStorage, SolutionRegistry};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<InstanceManager>,
    pub securt: Arc<SecuRTManager>,
    pub pool: Arc<NodePool>,
    pub solutions: Arc<SolutionRegistry>,
    pub config_store: Arc<ConfigStore>,
    pub storage: Arc<NodeStorage>,
    pub config: Arc<Config>,
}
