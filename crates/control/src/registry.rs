// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Instance registry.
//!
//! Thread-safe map from instance id to [`InstanceRecord`]. The registry owns
//! the record only; the instance manager owns the graph lifetime.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::CreateInstanceRequest;

/// The runtime unit: a named, addressable realisation of a solution.
///
/// Invariant: `running` implies `loaded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub instance_id: String,
    pub display_name: String,
    pub group: String,
    pub solution_id: String,
    pub persistent: bool,
    pub auto_start: bool,
    pub auto_restart: bool,
    pub loaded: bool,
    pub running: bool,
    pub frame_rate_limit: u32,
    pub detector_mode: String,
    pub detection_sensitivity: String,
    pub movement_sensitivity: String,
    pub sensor_modality: String,
    pub metadata_mode: bool,
    pub statistics_mode: bool,
    pub diagnostics_mode: bool,
    pub debug_mode: bool,
    pub fps: f64,
    pub rtsp_url: Option<String>,
    pub rtmp_url: Option<String>,
    #[serde(skip, default = "SystemTime::now")]
    pub created_at: SystemTime,
}

impl InstanceRecord {
    pub fn from_request(instance_id: &str, request: &CreateInstanceRequest) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            display_name: request.name.clone(),
            group: request.group.clone(),
            solution_id: request.solution.clone(),
            persistent: request.persistent,
            auto_start: request.auto_start,
            auto_restart: request.auto_restart,
            loaded: false,
            running: false,
            frame_rate_limit: request.frame_rate_limit,
            detector_mode: request.detector_mode.clone(),
            detection_sensitivity: request.detection_sensitivity.clone(),
            movement_sensitivity: request.movement_sensitivity.clone(),
            sensor_modality: request.sensor_modality.clone(),
            metadata_mode: request.metadata_mode,
            statistics_mode: request.statistics_mode,
            diagnostics_mode: request.diagnostics_mode,
            debug_mode: request.debug_mode,
            fps: 0.0,
            rtsp_url: request.param("RTSP_URL").map(String::from),
            rtmp_url: None,
            created_at: SystemTime::now(),
        }
    }
}

/// Partial record: only fields carrying a value are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdate {
    pub display_name: Option<String>,
    pub group: Option<String>,
    pub solution: Option<String>,
    pub persistent: Option<bool>,
    pub auto_start: Option<bool>,
    pub auto_restart: Option<bool>,
    pub frame_rate_limit: Option<u32>,
    pub detector_mode: Option<String>,
    pub detection_sensitivity: Option<String>,
    pub movement_sensitivity: Option<String>,
    pub sensor_modality: Option<String>,
    pub metadata_mode: Option<bool>,
    pub statistics_mode: Option<bool>,
    pub diagnostics_mode: Option<bool>,
    pub debug_mode: Option<bool>,
    /// New `${TOKEN}` bindings (source URL, model paths, ...). Always a
    /// rebuild trigger.
    pub additional_params: Option<BTreeMap<String, String>>,
}

impl InstanceUpdate {
    /// Whether applying this patch invalidates the built graph.
    pub const fn requires_rebuild(&self) -> bool {
        self.solution.is_some()
            || self.additional_params.is_some()
            || self.detector_mode.is_some()
            || self.detection_sensitivity.is_some()
            || self.movement_sensitivity.is_some()
            || self.sensor_modality.is_some()
    }

    /// Applies the in-place fields to a record.
    pub fn apply_to(&self, record: &mut InstanceRecord) {
        if let Some(v) = &self.display_name {
            record.display_name.clone_from(v);
        }
        if let Some(v) = &self.group {
            record.group.clone_from(v);
        }
        if let Some(v) = &self.solution {
            record.solution_id.clone_from(v);
        }
        if let Some(v) = self.persistent {
            record.persistent = v;
        }
        if let Some(v) = self.auto_start {
            record.auto_start = v;
        }
        if let Some(v) = self.auto_restart {
            record.auto_restart = v;
        }
        if let Some(v) = self.frame_rate_limit {
            record.frame_rate_limit = v;
        }
        if let Some(v) = &self.detector_mode {
            record.detector_mode.clone_from(v);
        }
        if let Some(v) = &self.detection_sensitivity {
            record.detection_sensitivity.clone_from(v);
        }
        if let Some(v) = &self.movement_sensitivity {
            record.movement_sensitivity.clone_from(v);
        }
        if let Some(v) = &self.sensor_modality {
            record.sensor_modality.clone_from(v);
        }
        if let Some(v) = self.metadata_mode {
            record.metadata_mode = v;
        }
        if let Some(v) = self.statistics_mode {
            record.statistics_mode = v;
        }
        if let Some(v) = self.diagnostics_mode {
            record.diagnostics_mode = v;
        }
        if let Some(v) = self.debug_mode {
            record.debug_mode = v;
        }
    }
}

/// Thread-safe `instanceId → InstanceRecord` map.
#[derive(Default)]
pub struct InstanceRegistry {
    records: RwLock<HashMap<String, InstanceRecord>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record; duplicates are rejected.
    pub fn create(&self, record: InstanceRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&record.instance_id) {
            return Err(VisionKitError::Conflict(format!(
                "instance '{}' already exists",
                record.instance_id
            )));
        }
        records.insert(record.instance_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.records.read().unwrap_or_else(PoisonError::into_inner).get(instance_id).cloned()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.records.read().unwrap_or_else(PoisonError::into_inner).contains_key(instance_id)
    }

    /// Merges a partial record. `NotFound` on unknown id.
    pub fn update(&self, instance_id: &str, patch: &InstanceUpdate) -> Result<InstanceRecord> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;
        patch.apply_to(record);
        Ok(record.clone())
    }

    /// Point mutation under the registry lock.
    pub fn with_record<F>(&self, instance_id: &str, mutate: F) -> Result<InstanceRecord>
    where
        F: FnOnce(&mut InstanceRecord),
    {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;
        mutate(record);
        debug_assert!(!record.running || record.loaded, "running implies loaded");
        Ok(record.clone())
    }

    pub fn delete(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.records.write().unwrap_or_else(PoisonError::into_inner).remove(instance_id)
    }

    pub fn list(&self) -> Vec<InstanceRecord> {
        let mut all: Vec<InstanceRecord> =
            self.records.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        all.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        all
    }

    pub fn count(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
