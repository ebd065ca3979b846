// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Instance creation request shared by the manager, builder and factories.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything needed to materialise and register an instance.
///
/// `additional_params` carries the uppercase `${TOKEN}` bindings (FILE_PATH,
/// RTSP_URL, RTMP_URL, MODEL_PATH, ...) that the pipeline builder substitutes
/// into solution parameters. Request-aware node factories also read transport
/// and tuning overrides from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    #[serde(default)]
    pub group: String,
    /// Solution id to materialise.
    pub solution: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub frame_rate_limit: u32,
    #[serde(default = "default_detector_mode")]
    pub detector_mode: String,
    #[serde(default = "default_sensitivity")]
    pub detection_sensitivity: String,
    #[serde(default = "default_sensitivity")]
    pub movement_sensitivity: String,
    #[serde(default = "default_modality")]
    pub sensor_modality: String,
    #[serde(default)]
    pub metadata_mode: bool,
    #[serde(default)]
    pub statistics_mode: bool,
    #[serde(default)]
    pub diagnostics_mode: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub additional_params: BTreeMap<String, String>,
}

fn default_detector_mode() -> String {
    "SmartDetection".to_string()
}

fn default_sensitivity() -> String {
    "Low".to_string()
}

fn default_modality() -> String {
    "RGB".to_string()
}

impl CreateInstanceRequest {
    pub fn new(name: impl Into<String>, solution: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: String::new(),
            solution: solution.into(),
            persistent: false,
            auto_start: false,
            auto_restart: false,
            frame_rate_limit: 0,
            detector_mode: default_detector_mode(),
            detection_sensitivity: default_sensitivity(),
            movement_sensitivity: default_sensitivity(),
            sensor_modality: default_modality(),
            metadata_mode: false,
            statistics_mode: false,
            diagnostics_mode: false,
            debug_mode: false,
            additional_params: BTreeMap::new(),
        }
    }

    /// Convenience accessor for an additional param by key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.additional_params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}
