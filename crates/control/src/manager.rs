// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Instance manager.
//!
//! Owns instance lifecycle end to end: admission against the global cap,
//! pipeline builds, graph start/stop, configuration patches (with rebuild
//! when a patch touches graph-shaping fields), statistics and cascaded
//! cleanup. The registry owns records; the manager owns graphs.

use crate::registry::{InstanceRecord, InstanceRegistry, InstanceUpdate};
use opentelemetry::global;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::stats::InstanceStatistics;
use visionkit_core::{ConfigStore, CreateInstanceRequest, StatsCollector};
use visionkit_engine::{Engine, GraphHandle, PipelineBuilder};
use visionkit_nodes::extract_rtmp_stream_key;

/// Hook invoked with the instance id after a delete, for cascading cleanup
/// (analytics entities, SecuRT mirrors).
pub type CascadeHook = Box<dyn Fn(&str) + Send + Sync>;

/// Outcome of pushing entity configuration towards a live graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityApplyOutcome {
    /// The running nodes accepted the update; no rebuild needed.
    Applied,
    /// No node could take the update in place; a rebuild is required.
    NeedsRebuild,
}

struct GraphState {
    graph: GraphHandle,
    request: CreateInstanceRequest,
    /// node name → resolved parameters recorded at build time, diffed by
    /// updates.
    bindings: BTreeMap<String, BTreeMap<String, String>>,
    /// Entity parameters stored while the instance is stopped; applied on
    /// the next start.
    pending_entity_params: BTreeMap<String, String>,
}

/// Create/update/delete/start/stop orchestration for instances.
pub struct InstanceManager {
    registry: InstanceRegistry,
    builder: PipelineBuilder,
    engine: Engine,
    config: Arc<ConfigStore>,
    stats: Arc<StatsCollector>,
    graphs: Mutex<HashMap<String, GraphState>>,
    cascade_hooks: Mutex<Vec<CascadeHook>>,
    instances_active_gauge: opentelemetry::metrics::Gauge<u64>,
    instances_created_counter: opentelemetry::metrics::Counter<u64>,
    instances_destroyed_counter: opentelemetry::metrics::Counter<u64>,
    instance_lifetime_histogram: opentelemetry::metrics::Histogram<f64>,
}

impl InstanceManager {
    pub fn new(builder: PipelineBuilder, engine: Engine, config: Arc<ConfigStore>) -> Self {
        let stats = Arc::clone(engine.stats());
        let meter = global::meter("vkit_instances");
        Self {
            registry: InstanceRegistry::new(),
            builder,
            engine,
            config,
            stats,
            graphs: Mutex::new(HashMap::new()),
            cascade_hooks: Mutex::new(Vec::new()),
            instances_active_gauge: meter
                .u64_gauge("instances.active")
                .with_description("Number of registered instances")
                .build(),
            instances_created_counter: meter
                .u64_counter("instances.created")
                .with_description("Total number of instances created")
                .build(),
            instances_destroyed_counter: meter
                .u64_counter("instances.destroyed")
                .with_description("Total number of instances destroyed")
                .build(),
            instance_lifetime_histogram: meter
                .f64_histogram("instance.lifetime")
                .with_description("Instance lifetime in seconds")
                .with_unit("s")
                .build(),
        }
    }

    /// Registers a cascade hook run after every successful delete.
    pub fn register_cascade_hook(&self, hook: CascadeHook) {
        self.cascade_hooks.lock().unwrap_or_else(PoisonError::into_inner).push(hook);
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn builder(&self) -> &PipelineBuilder {
        &self.builder
    }

    /// Admission check. The cap is re-read from the config store on every
    /// call so it can be reconfigured live; 0 means unlimited.
    fn check_admission(&self) -> Result<()> {
        let cap = self.config.max_running_instances();
        if cap == 0 {
            return Ok(());
        }
        let current = self.registry.count();
        if current >= cap {
            tracing::warn!(cap, current, "Instance admission denied");
            return Err(VisionKitError::AdmissionDenied { cap, current });
        }
        Ok(())
    }

    /// RTMP stream keys currently allocated by loaded instances.
    fn existing_rtmp_keys(&self) -> HashSet<String> {
        let graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
        graphs
            .values()
            .filter_map(|s| s.graph.rtmp_url())
            .filter_map(|url| extract_rtmp_stream_key(&url))
            .collect()
    }

    /// Creates an instance from a request: admission, pipeline build, graph
    /// wiring, registration, and an optional auto-start. On any failure the
    /// instance is not created and no partial resources survive.
    pub fn create(&self, request: CreateInstanceRequest) -> Result<InstanceRecord> {
        self.check_admission()?;

        let instance_id = uuid::Uuid::new_v4().to_string();
        let existing_keys = self.existing_rtmp_keys();
        let built = self.builder.build(&instance_id, &request, &existing_keys)?;
        let graph = self.engine.build_graph(&instance_id, built.nodes, request.frame_rate_limit)?;

        let mut record = InstanceRecord::from_request(&instance_id, &request);
        record.loaded = true;
        record.rtmp_url = built.rtmp_url;
        self.registry.create(record.clone())?;

        {
            let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            graphs.insert(
                instance_id.clone(),
                GraphState {
                    graph,
                    request: request.clone(),
                    bindings: built.bindings,
                    pending_entity_params: BTreeMap::new(),
                },
            );
        }

        self.instances_created_counter.add(1, &[]);
        self.instances_active_gauge.record(self.registry.count() as u64, &[]);
        tracing::info!(
            instance_id = %instance_id,
            solution_id = %request.solution,
            "Created instance"
        );

        if request.auto_start {
            if let Err(e) = self.start(&instance_id) {
                tracing::warn!(instance_id = %instance_id, error = %e, "Auto-start failed");
            }
        }

        self.registry
            .get(&instance_id)
            .ok_or_else(|| VisionKitError::Internal("record vanished after create".to_string()))
    }

    pub fn get(&self, instance_id: &str) -> Option<InstanceRecord> {
        self.registry.get(instance_id)
    }

    pub fn has_instance(&self, instance_id: &str) -> bool {
        self.registry.contains(instance_id)
    }

    pub fn list(&self) -> Vec<InstanceRecord> {
        self.registry.list()
    }

    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// Starts the instance's graph. A no-op when already running; rebuilds
    /// first when the graph was invalidated by an earlier failed update.
    pub fn start(&self, instance_id: &str) -> Result<InstanceRecord> {
        let record = self
            .registry
            .get(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;
        if record.running {
            return Ok(record);
        }
        if !record.loaded {
            return Err(VisionKitError::PreconditionFailed(format!(
                "instance '{instance_id}' has no valid graph; update it to rebuild"
            )));
        }

        let pending = {
            let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            let state = graphs.get_mut(instance_id).ok_or_else(|| {
                VisionKitError::PreconditionFailed(format!(
                    "instance '{instance_id}' graph is missing"
                ))
            })?;
            state.graph.start()?;
            std::mem::take(&mut state.pending_entity_params)
        };

        // Mutations stored while stopped are applied on start.
        if !pending.is_empty() {
            if let Err(e) = self.push_params_to_graph(instance_id, &pending) {
                tracing::warn!(instance_id = %instance_id, error = %e, "Deferred entity update failed");
            }
        }

        self.registry.with_record(instance_id, |r| {
            r.running = true;
            r.loaded = true;
        })
    }

    /// Stops the instance's graph, retaining it for a later start. No-op
    /// when already stopped.
    pub fn stop(&self, instance_id: &str) -> Result<InstanceRecord> {
        let record = self
            .registry
            .get(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;
        if !record.running {
            return Ok(record);
        }

        {
            let graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = graphs.get(instance_id) {
                state.graph.stop();
            }
        }
        self.registry.with_record(instance_id, |r| r.running = false)
    }

    /// Applies a patch. Rebuild-triggering fields stop the graph, rebuild it
    /// from the merged request and restart it when the instance was running.
    pub fn update(&self, instance_id: &str, patch: &InstanceUpdate) -> Result<InstanceRecord> {
        if !self.registry.contains(instance_id) {
            return Err(VisionKitError::NotFound(format!("instance '{instance_id}'")));
        }

        let record = self.registry.update(instance_id, patch)?;
        if !patch.requires_rebuild() {
            return Ok(record);
        }

        // Fold the patch into the stored request before rebuilding.
        {
            let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = graphs.get_mut(instance_id) {
                let request = &mut state.request;
                if let Some(solution) = &patch.solution {
                    request.solution.clone_from(solution);
                }
                if let Some(params) = &patch.additional_params {
                    request.additional_params.extend(params.clone());
                }
                if let Some(v) = &patch.detector_mode {
                    request.detector_mode.clone_from(v);
                }
                if let Some(v) = &patch.detection_sensitivity {
                    request.detection_sensitivity.clone_from(v);
                }
                if let Some(v) = &patch.movement_sensitivity {
                    request.movement_sensitivity.clone_from(v);
                }
                if let Some(v) = &patch.sensor_modality {
                    request.sensor_modality.clone_from(v);
                }
            }
        }

        self.rebuild(instance_id)?;
        self.registry
            .get(instance_id)
            .ok_or_else(|| VisionKitError::Internal("record vanished after update".to_string()))
    }

    /// Tears the graph down and rebuilds it from the stored request,
    /// preserving the instance id. A previously-running instance is
    /// restarted; a failed rebuild leaves the record visible but unloaded.
    pub fn rebuild(&self, instance_id: &str) -> Result<()> {
        let was_running = self.registry.get(instance_id).is_some_and(|r| r.running);

        let (request, pending) = {
            let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            let state = graphs.remove(instance_id).ok_or_else(|| {
                VisionKitError::NotFound(format!("instance '{instance_id}' has no graph"))
            })?;
            state.graph.destroy();
            (state.request, state.pending_entity_params)
        };
        self.registry.with_record(instance_id, |r| {
            r.running = false;
            r.loaded = false;
        })?;

        let existing_keys = self.existing_rtmp_keys();
        let built = match self.builder.build(instance_id, &request, &existing_keys) {
            Ok(built) => built,
            Err(e) => {
                tracing::error!(instance_id = %instance_id, error = %e, "Rebuild failed");
                return Err(e);
            },
        };
        let graph =
            self.engine.build_graph(instance_id, built.nodes, request.frame_rate_limit)?;

        {
            let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            graphs.insert(
                instance_id.to_string(),
                GraphState {
                    graph,
                    request,
                    bindings: built.bindings,
                    pending_entity_params: pending,
                },
            );
        }
        self.registry.with_record(instance_id, |r| {
            r.loaded = true;
            r.rtmp_url = built.rtmp_url.clone();
        })?;

        tracing::info!(instance_id = %instance_id, was_running, "Rebuilt instance graph");
        if was_running {
            self.start(instance_id)?;
        }
        Ok(())
    }

    /// Deletes the instance: stop, release graph and statistics, drop the
    /// record and run the cascade hooks.
    pub fn delete(&self, instance_id: &str) -> Result<()> {
        let record = self
            .registry
            .get(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;

        {
            let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = graphs.remove(instance_id) {
                state.graph.destroy();
            }
        }
        self.stats.clear(instance_id);
        self.registry.delete(instance_id);

        let lifetime =
            SystemTime::now().duration_since(record.created_at).unwrap_or_default().as_secs_f64();
        self.instances_destroyed_counter.add(1, &[]);
        self.instances_active_gauge.record(self.registry.count() as u64, &[]);
        self.instance_lifetime_histogram.record(lifetime, &[]);

        // Cascades run outside the graph lock.
        let hooks = self.cascade_hooks.lock().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook(instance_id);
        }
        tracing::info!(instance_id = %instance_id, "Deleted instance");
        Ok(())
    }

    /// Latest statistics snapshot; the record's observable fps is refreshed
    /// as a side effect. `None` on unknown id.
    pub fn get_instance_statistics(&self, instance_id: &str) -> Option<InstanceStatistics> {
        let record = self.registry.get(instance_id)?;
        let mut snapshot = self.stats.snapshot(instance_id).unwrap_or_default();
        snapshot.is_running = record.running;
        let _ = self.registry.with_record(instance_id, |r| r.fps = snapshot.frame_rate);
        Some(snapshot)
    }

    /// Pushes parameters into the live graph nodes.
    fn push_params_to_graph(
        &self,
        instance_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
        let state = graphs.get(instance_id).ok_or_else(|| {
            VisionKitError::NotFound(format!("instance '{instance_id}' has no graph"))
        })?;
        for node in state.graph.nodes() {
            if node.apply_update(params)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Attempts an in-place runtime update for entity configuration.
    ///
    /// When no node accepts it: a running instance reports `NeedsRebuild`
    /// (the caller schedules one); a stopped instance stores the parameters
    /// and applies them on next start.
    pub fn apply_entity_params(
        &self,
        instance_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<EntityApplyOutcome> {
        let record = self
            .registry
            .get(instance_id)
            .ok_or_else(|| VisionKitError::NotFound(format!("instance '{instance_id}'")))?;

        if self.push_params_to_graph(instance_id, params)? {
            return Ok(EntityApplyOutcome::Applied);
        }

        if record.running {
            return Ok(EntityApplyOutcome::NeedsRebuild);
        }

        let mut graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = graphs.get_mut(instance_id) {
            state.pending_entity_params.extend(params.clone());
        }
        Ok(EntityApplyOutcome::Applied)
    }

    /// The parameter binding recorded when the graph was last built.
    pub fn bindings(&self, instance_id: &str) -> Option<BTreeMap<String, BTreeMap<String, String>>> {
        let graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
        graphs.get(instance_id).map(|s| s.bindings.clone())
    }

    /// The `${TOKEN}` bindings of the stored request, for instance
    /// snapshots.
    pub fn request_params(&self, instance_id: &str) -> Option<BTreeMap<String, String>> {
        let graphs = self.graphs.lock().unwrap_or_else(PoisonError::into_inner);
        graphs.get(instance_id).map(|s| s.request.additional_params.clone())
    }
}
