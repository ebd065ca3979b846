// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! SecuRT facade.
//!
//! A domain-specific flavor of instance exposing sensitivity/modality knobs
//! and analytics entities over the same core machinery. The facade keeps a
//! mirror registry keyed by the core instance id and auto-adopts compatible
//! core instances on first probe.

use crate::entities::{Area, AreaKind, EntitySetState, EntityStore, Line, LineKind, Point};
use crate::manager::{EntityApplyOutcome, InstanceManager};
use crate::registry::InstanceUpdate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::stats::InstanceStatistics;
use visionkit_core::CreateInstanceRequest;

/// A SecuRT instance mirror. At most one per core instance, same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuRTInstance {
    pub instance_id: String,
    pub name: String,
    pub detector_mode: String,
    pub detection_sensitivity: String,
    pub movement_sensitivity: String,
    pub sensor_modality: String,
    pub frame_rate_limit: f64,
    pub metadata_mode: bool,
    pub statistics_mode: bool,
    pub diagnostics_mode: bool,
    pub debug_mode: bool,
    #[serde(skip, default = "SystemTime::now")]
    pub created_at: SystemTime,
}

impl Default for SecuRTInstance {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            name: String::new(),
            detector_mode: "SmartDetection".to_string(),
            detection_sensitivity: "Low".to_string(),
            movement_sensitivity: "Low".to_string(),
            sensor_modality: "RGB".to_string(),
            frame_rate_limit: 0.0,
            metadata_mode: false,
            statistics_mode: false,
            diagnostics_mode: false,
            debug_mode: false,
            created_at: SystemTime::now(),
        }
    }
}

/// Write schema: only fields carrying a value are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuRTInstanceWrite {
    pub name: Option<String>,
    pub detector_mode: Option<String>,
    pub detection_sensitivity: Option<String>,
    pub movement_sensitivity: Option<String>,
    pub sensor_modality: Option<String>,
    pub frame_rate_limit: Option<f64>,
    pub metadata_mode: Option<bool>,
    pub statistics_mode: Option<bool>,
    pub diagnostics_mode: Option<bool>,
    pub debug_mode: Option<bool>,
}

impl SecuRTInstanceWrite {
    fn apply_to(&self, instance: &mut SecuRTInstance) {
        if let Some(v) = &self.name {
            instance.name.clone_from(v);
        }
        if let Some(v) = &self.detector_mode {
            instance.detector_mode.clone_from(v);
        }
        if let Some(v) = &self.detection_sensitivity {
            instance.detection_sensitivity.clone_from(v);
        }
        if let Some(v) = &self.movement_sensitivity {
            instance.movement_sensitivity.clone_from(v);
        }
        if let Some(v) = &self.sensor_modality {
            instance.sensor_modality.clone_from(v);
        }
        if let Some(v) = self.frame_rate_limit {
            instance.frame_rate_limit = v;
        }
        if let Some(v) = self.metadata_mode {
            instance.metadata_mode = v;
        }
        if let Some(v) = self.statistics_mode {
            instance.statistics_mode = v;
        }
        if let Some(v) = self.diagnostics_mode {
            instance.diagnostics_mode = v;
        }
        if let Some(v) = self.debug_mode {
            instance.debug_mode = v;
        }
    }
}

/// Solution ids whose instances support the SecuRT line/area APIs.
pub fn is_compatible_solution(solution_id: &str) -> bool {
    const COMPATIBLE: &[&str] =
        &["securt", "ba_crossline", "ba_jam", "ba_stop", "ba_area_enter_exit"];
    COMPATIBLE.iter().any(|token| solution_id == *token || solution_id.contains(token))
}

/// Mirror registry keyed by core instance id.
#[derive(Default)]
pub struct SecuRTRegistry {
    instances: RwLock<HashMap<String, SecuRTInstance>>,
}

impl SecuRTRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, instance: SecuRTInstance) -> bool {
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        if instances.contains_key(&instance.instance_id) {
            return false;
        }
        instances.insert(instance.instance_id.clone(), instance);
        true
    }

    pub fn get(&self, instance_id: &str) -> Option<SecuRTInstance> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).get(instance_id).cloned()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.read().unwrap_or_else(PoisonError::into_inner).contains_key(instance_id)
    }

    pub fn update(&self, instance_id: &str, write: &SecuRTInstanceWrite) -> bool {
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        match instances.get_mut(instance_id) {
            Some(instance) => {
                write.apply_to(instance);
                true
            },
            None => false,
        }
    }

    pub fn delete(&self, instance_id: &str) -> bool {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance_id)
            .is_some()
    }

    pub fn list(&self) -> Vec<SecuRTInstance> {
        let mut all: Vec<SecuRTInstance> = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        all
    }
}

/// SecuRT orchestration over the core instance manager.
pub struct SecuRTManager {
    core: Arc<InstanceManager>,
    registry: Arc<SecuRTRegistry>,
    entities: Arc<EntityStore>,
}

impl SecuRTManager {
    /// Builds the facade and registers its cascade cleanup with the core
    /// manager: deleting a core instance removes the mirror and the entity
    /// set.
    pub fn new(core: Arc<InstanceManager>) -> Self {
        let registry = Arc::new(SecuRTRegistry::new());
        let entities = Arc::new(EntityStore::new());

        let registry_for_cascade = Arc::clone(&registry);
        let entities_for_cascade = Arc::clone(&entities);
        core.register_cascade_hook(Box::new(move |instance_id| {
            if registry_for_cascade.delete(instance_id) {
                tracing::info!(instance_id = %instance_id, "Removed SecuRT mirror");
            }
            entities_for_cascade.remove_instance(instance_id);
        }));

        Self { core, registry, entities }
    }

    pub fn core(&self) -> &Arc<InstanceManager> {
        &self.core
    }

    pub fn entities(&self) -> &Arc<EntityStore> {
        &self.entities
    }

    fn core_request(write: &SecuRTInstanceWrite) -> CreateInstanceRequest {
        let name = write
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "SecuRT Instance".to_string());
        let mut request = CreateInstanceRequest::new(name, "securt");
        if let Some(v) = &write.detector_mode {
            request.detector_mode.clone_from(v);
        }
        if let Some(v) = &write.detection_sensitivity {
            request.detection_sensitivity.clone_from(v);
        }
        if let Some(v) = &write.movement_sensitivity {
            request.movement_sensitivity.clone_from(v);
        }
        if let Some(v) = &write.sensor_modality {
            request.sensor_modality.clone_from(v);
        }
        if let Some(v) = write.frame_rate_limit {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                request.frame_rate_limit = v.max(0.0) as u32;
            }
        }
        request.metadata_mode = write.metadata_mode.unwrap_or(false);
        request.statistics_mode = write.statistics_mode.unwrap_or(false);
        request.diagnostics_mode = write.diagnostics_mode.unwrap_or(false);
        request.debug_mode = write.debug_mode.unwrap_or(false);
        // SecuRT has no explicit start endpoint; instances run as soon as
        // they are created.
        request.auto_start = true;

        // Detector defaults so the instance can start without explicit model
        // paths; overridable through the input/feature endpoints.
        let defaults = [
            ("WEIGHTS_PATH", "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721_best.weights"),
            ("CONFIG_PATH", "/opt/edge_ai_api/models/det_cls/yolov3-tiny-2022-0721.cfg"),
            ("LABELS_PATH", "/opt/edge_ai_api/models/det_cls/yolov3_tiny_5classes.txt"),
            ("RTSP_URL", "rtsp://localhost:8554/stream"),
        ];
        for (key, value) in defaults {
            request
                .additional_params
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        request
    }

    /// Creates a SecuRT instance, delegating to the core. The core mints its
    /// own UUID; when a caller-requested id differs, the core id is adopted
    /// with a warning.
    pub fn create_instance(
        &self,
        requested_id: Option<&str>,
        write: &SecuRTInstanceWrite,
    ) -> Result<SecuRTInstance> {
        if let Some(id) = requested_id {
            if self.registry.contains(id) || self.core.has_instance(id) {
                return Err(VisionKitError::Conflict(format!("instance '{id}' already exists")));
            }
        }

        let record = self.core.create(Self::core_request(write))?;
        let core_id = record.instance_id.clone();
        if let Some(requested) = requested_id {
            if requested != core_id {
                tracing::warn!(
                    requested_id = %requested,
                    core_id = %core_id,
                    "Core instance id differs from requested id; using core id"
                );
            }
        }

        let mut instance = SecuRTInstance { instance_id: core_id.clone(), ..Default::default() };
        write.apply_to(&mut instance);
        if instance.name.is_empty() {
            instance.name = record.display_name;
        }

        if !self.registry.create(instance.clone()) {
            // Roll the core instance back so creation is all-or-nothing.
            let _ = self.core.delete(&core_id);
            return Err(VisionKitError::Conflict(format!(
                "instance '{core_id}' already exists"
            )));
        }
        tracing::info!(instance_id = %core_id, "Created SecuRT instance");
        Ok(instance)
    }

    /// Applies present fields to the mirror and forwards them to the core.
    pub fn update_instance(
        &self,
        instance_id: &str,
        write: &SecuRTInstanceWrite,
    ) -> Result<SecuRTInstance> {
        if !self.has_instance(instance_id) {
            return Err(VisionKitError::NotFound(format!("instance '{instance_id}'")));
        }
        self.registry.update(instance_id, write);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frame_rate_limit = write.frame_rate_limit.map(|v| v.max(0.0) as u32);
        let patch = InstanceUpdate {
            display_name: write.name.clone(),
            detector_mode: write.detector_mode.clone(),
            detection_sensitivity: write.detection_sensitivity.clone(),
            movement_sensitivity: write.movement_sensitivity.clone(),
            sensor_modality: write.sensor_modality.clone(),
            frame_rate_limit,
            metadata_mode: write.metadata_mode,
            statistics_mode: write.statistics_mode,
            diagnostics_mode: write.diagnostics_mode,
            debug_mode: write.debug_mode,
            ..InstanceUpdate::default()
        };
        self.core.update(instance_id, &patch)?;

        self.registry
            .get(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))
    }

    /// Deletes the SecuRT instance and its core counterpart. Entities go
    /// with it through the core cascade.
    pub fn delete_instance(&self, instance_id: &str) -> Result<()> {
        if !self.has_instance(instance_id) {
            return Err(VisionKitError::NotFound(format!("instance '{instance_id}'")));
        }
        self.registry.delete(instance_id);
        self.core.delete(instance_id)
    }

    pub fn get_instance(&self, instance_id: &str) -> Option<SecuRTInstance> {
        if let Some(instance) = self.registry.get(instance_id) {
            return Some(instance);
        }
        if self.has_instance(instance_id) {
            return self.registry.get(instance_id);
        }
        None
    }

    /// Checks the mirror first, then probes the core: a compatible core
    /// instance is auto-adopted on first probe.
    pub fn has_instance(&self, instance_id: &str) -> bool {
        if self.registry.contains(instance_id) {
            return true;
        }
        let Some(record) = self.core.get(instance_id) else {
            return false;
        };
        if !is_compatible_solution(&record.solution_id) {
            return false;
        }

        let adopted = SecuRTInstance {
            instance_id: record.instance_id.clone(),
            name: record.display_name.clone(),
            detector_mode: record.detector_mode.clone(),
            detection_sensitivity: record.detection_sensitivity.clone(),
            movement_sensitivity: record.movement_sensitivity.clone(),
            sensor_modality: record.sensor_modality.clone(),
            frame_rate_limit: f64::from(record.frame_rate_limit),
            metadata_mode: record.metadata_mode,
            statistics_mode: record.statistics_mode,
            diagnostics_mode: record.diagnostics_mode,
            debug_mode: record.debug_mode,
            created_at: record.created_at,
        };
        if self.registry.create(adopted) {
            tracing::info!(
                instance_id = %instance_id,
                solution_id = %record.solution_id,
                "Auto-adopted compatible core instance into SecuRT"
            );
        }
        true
    }

    /// Combined statistics: the core snapshot with the mirror's creation
    /// stamp as a start-time fallback.
    pub fn get_statistics(&self, instance_id: &str) -> Option<InstanceStatistics> {
        if !self.has_instance(instance_id) {
            return None;
        }
        let mut snapshot = self.core.get_instance_statistics(instance_id).unwrap_or_default();
        if snapshot.start_time_ms == 0 {
            if let Some(mirror) = self.registry.get(instance_id) {
                snapshot.start_time_ms = mirror
                    .created_at
                    .duration_since(UNIX_EPOCH)
                    .ok()
                    .and_then(|d| i64::try_from(d.as_millis()).ok())
                    .unwrap_or(0);
            }
        }
        Some(snapshot)
    }

    // --- analytics entities ---

    /// Pushes the instance's entity set at the graph: in-place when
    /// possible, otherwise a restart that preserves the instance id.
    fn sync_entities(&self, instance_id: &str) -> Result<()> {
        let Some(params) = self.entities.node_params(instance_id) else {
            return Ok(());
        };

        match self.core.apply_entity_params(instance_id, &params)? {
            EntityApplyOutcome::Applied => {
                self.entities.set_state(instance_id, EntitySetState::Clean);
            },
            EntityApplyOutcome::NeedsRebuild => {
                self.entities.set_state(instance_id, EntitySetState::Rebuilding);
                self.core.rebuild(instance_id)?;
                // The rebuilt graph takes the set in place.
                let _ = self.core.apply_entity_params(instance_id, &params)?;
                self.entities.set_state(instance_id, EntitySetState::Clean);
            },
        }
        Ok(())
    }

    fn require_instance(&self, instance_id: &str) -> Result<()> {
        if self.has_instance(instance_id) {
            Ok(())
        } else {
            Err(VisionKitError::NotFound(format!("instance '{instance_id}'")))
        }
    }

    pub fn add_line(&self, instance_id: &str, mut line: Line) -> Result<Line> {
        self.require_instance(instance_id)?;
        if line.coordinates.len() < 2 {
            return Err(VisionKitError::InvalidArgument(
                "a line needs at least two coordinates".to_string(),
            ));
        }
        if line.line_id.is_empty() {
            line.line_id = uuid::Uuid::new_v4().to_string();
        }
        self.entities.upsert_line(instance_id, line.clone());
        self.sync_entities(instance_id)?;
        Ok(line)
    }

    pub fn get_line(&self, instance_id: &str, line_id: &str) -> Result<Line> {
        self.require_instance(instance_id)?;
        self.entities
            .get_line(instance_id, line_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("line '{line_id}'")))
    }

    pub fn delete_line(&self, instance_id: &str, line_id: &str) -> Result<()> {
        self.require_instance(instance_id)?;
        if !self.entities.delete_line(instance_id, line_id) {
            return Err(VisionKitError::NotFound(format!("line '{line_id}'")));
        }
        self.sync_entities(instance_id)
    }

    pub fn delete_lines_of_kind(&self, instance_id: &str, kind: LineKind) -> Result<usize> {
        self.require_instance(instance_id)?;
        let removed = self.entities.delete_lines_of_kind(instance_id, kind);
        if removed > 0 {
            self.sync_entities(instance_id)?;
        }
        Ok(removed)
    }

    pub fn add_area(&self, instance_id: &str, mut area: Area) -> Result<Area> {
        self.require_instance(instance_id)?;
        if area.coordinates.len() < 3 {
            return Err(VisionKitError::InvalidArgument(
                "an area needs at least three coordinates".to_string(),
            ));
        }
        if area.area_id.is_empty() {
            area.area_id = uuid::Uuid::new_v4().to_string();
        }
        self.entities.upsert_area(instance_id, area.clone());
        self.sync_entities(instance_id)?;
        Ok(area)
    }

    pub fn delete_area(&self, instance_id: &str, area_id: &str) -> Result<()> {
        self.require_instance(instance_id)?;
        if !self.entities.delete_area(instance_id, area_id) {
            return Err(VisionKitError::NotFound(format!("area '{area_id}'")));
        }
        self.sync_entities(instance_id)
    }

    /// Lines grouped by kind. An instance with no entities yet yields an
    /// empty payload, not an error.
    pub fn lines_by_kind(&self, instance_id: &str) -> Result<BTreeMap<String, Vec<Line>>> {
        self.require_instance(instance_id)?;
        Ok(self.entities.get(instance_id).map(|s| s.lines_by_kind()).unwrap_or_default())
    }

    pub fn areas_by_kind(&self, instance_id: &str) -> Result<BTreeMap<String, Vec<Area>>> {
        self.require_instance(instance_id)?;
        Ok(self.entities.get(instance_id).map(|s| s.areas_by_kind()).unwrap_or_default())
    }

    /// Everything the instance owns, for the analytics_entities endpoint.
    pub fn analytics_entities(&self, instance_id: &str) -> Result<serde_json::Value> {
        self.require_instance(instance_id)?;
        let lines = self.entities.get(instance_id).map(|s| s.lines_by_kind()).unwrap_or_default();
        let areas = self.entities.get(instance_id).map(|s| s.areas_by_kind()).unwrap_or_default();
        Ok(serde_json::json!({ "lines": lines, "areas": areas }))
    }

    /// Applies a feature document (input, output, motion_area, ...). Input
    /// and output changes rewrite the source/destination bindings and
    /// rebuild; area-shaped features go through the entity path; the rest
    /// are stored as feature parameters on the instance.
    pub fn apply_feature(
        &self,
        instance_id: &str,
        feature: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        self.require_instance(instance_id)?;

        match feature {
            "input" => {
                let mut params = BTreeMap::new();
                let kind = body.get("type").and_then(|v| v.as_str()).unwrap_or("file");
                let url = body
                    .get("url")
                    .or_else(|| body.get("path"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        VisionKitError::InvalidArgument(
                            "input feature needs a 'url' or 'path'".to_string(),
                        )
                    })?;
                match kind {
                    "rtsp" | "stream" => params.insert("RTSP_URL".to_string(), url.to_string()),
                    "rtmp" => params.insert("RTMP_SRC_URL".to_string(), url.to_string()),
                    _ => params.insert("FILE_PATH".to_string(), url.to_string()),
                };
                let patch = InstanceUpdate {
                    additional_params: Some(params),
                    ..InstanceUpdate::default()
                };
                self.core.update(instance_id, &patch).map(|_| ())
            },
            "output" => {
                let url = body.get("url").and_then(|v| v.as_str()).ok_or_else(|| {
                    VisionKitError::InvalidArgument("output feature needs a 'url'".to_string())
                })?;
                let mut params = BTreeMap::new();
                params.insert("RTMP_URL".to_string(), url.to_string());
                params.insert("RTMP_DES_URL".to_string(), url.to_string());
                let patch = InstanceUpdate {
                    additional_params: Some(params),
                    ..InstanceUpdate::default()
                };
                self.core.update(instance_id, &patch).map(|_| ())
            },
            "motion_area" | "masking_areas" | "exclusion_areas" => {
                let kind = match feature {
                    "motion_area" => AreaKind::Motion,
                    "masking_areas" => AreaKind::Masking,
                    _ => AreaKind::Exclusion,
                };
                for document in area_documents(body) {
                    let area = parse_area(&document, kind)?;
                    self.add_area(instance_id, area)?;
                }
                Ok(())
            },
            _ => {
                // Remaining features (feature_extraction, lpr, pip, ...) are
                // stored as instance parameters and picked up on rebuild.
                let mut params = BTreeMap::new();
                params.insert(
                    format!("FEATURE_{}", feature.to_uppercase()),
                    body.to_string(),
                );
                let patch = InstanceUpdate {
                    additional_params: Some(params),
                    ..InstanceUpdate::default()
                };
                self.core.update(instance_id, &patch).map(|_| ())
            },
        }
    }
}

fn area_documents(body: &serde_json::Value) -> Vec<serde_json::Value> {
    body.get("areas")
        .and_then(|v| v.as_array())
        .map_or_else(|| vec![body.clone()], Clone::clone)
}

fn parse_area(document: &serde_json::Value, kind: AreaKind) -> Result<Area> {
    let coordinates = document
        .get("coordinates")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            VisionKitError::InvalidArgument("area needs a 'coordinates' array".to_string())
        })?
        .iter()
        .map(|p| {
            let x = p.get("x").and_then(serde_json::Value::as_f64);
            let y = p.get("y").and_then(serde_json::Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Point { x, y }),
                _ => Err(VisionKitError::InvalidArgument(
                    "coordinates must be {x, y} objects".to_string(),
                )),
            }
        })
        .collect::<Result<Vec<Point>>>()?;

    Ok(Area {
        area_id: document
            .get("areaId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_default(),
        kind,
        coordinates,
        classes: document
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|items| {
                items.iter().filter_map(|c| c.as_str().map(String::from)).collect()
            })
            .unwrap_or_default(),
        color: None,
        name: document.get("name").and_then(|v| v.as_str()).map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatible_solutions() {
        assert!(is_compatible_solution("securt"));
        assert!(is_compatible_solution("ba_crossline"));
        assert!(is_compatible_solution("ba_crossline_mqtt_default"));
        assert!(is_compatible_solution("ba_area_enter_exit"));
        assert!(!is_compatible_solution("face_detection_file_default"));
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = SecuRTRegistry::new();
        let instance =
            SecuRTInstance { instance_id: "i1".to_string(), ..SecuRTInstance::default() };
        assert!(registry.create(instance.clone()));
        assert!(!registry.create(instance), "duplicate rejected");

        let write = SecuRTInstanceWrite {
            detection_sensitivity: Some("High".to_string()),
            ..SecuRTInstanceWrite::default()
        };
        assert!(registry.update("i1", &write));
        let updated = registry.get("i1").expect("mirror");
        assert_eq!(updated.detection_sensitivity, "High");
        // Fields without a presence flag keep their values.
        assert_eq!(updated.movement_sensitivity, "Low");

        assert!(registry.delete("i1"));
        assert!(!registry.delete("i1"));
    }

    #[test]
    fn test_write_presence_flags() {
        let mut instance = SecuRTInstance {
            instance_id: "i1".to_string(),
            detection_sensitivity: "Medium".to_string(),
            ..SecuRTInstance::default()
        };
        let write = SecuRTInstanceWrite {
            frame_rate_limit: Some(12.0),
            ..SecuRTInstanceWrite::default()
        };
        write.apply_to(&mut instance);
        assert!((instance.frame_rate_limit - 12.0).abs() < f64::EPSILON);
        assert_eq!(instance.detection_sensitivity, "Medium");
    }
}
