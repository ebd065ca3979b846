// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Instance statistics tracking.
//!
//! Counters use atomic scalars so updates never block readers; the tracker
//! map itself sits behind a read-preferring lock. Snapshots may be stale,
//! `frames_processed` is monotone and `start_time_ms` never decreases.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time statistics for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatistics {
    pub start_time_ms: i64,
    pub frame_rate: f64,
    pub latency_ms: f64,
    pub frames_processed: u64,
    pub track_count: u32,
    pub is_running: bool,
}

impl Default for InstanceStatistics {
    fn default() -> Self {
        Self {
            start_time_ms: 0,
            frame_rate: 0.0,
            latency_ms: 0.0,
            frames_processed: 0,
            track_count: 0,
            is_running: false,
        }
    }
}

/// Per-instance atomic counters.
struct InstanceTracker {
    start_time_ms: AtomicI64,
    /// f64 bit patterns; readers reconstruct with `from_bits`.
    frame_rate_bits: AtomicU64,
    latency_bits: AtomicU64,
    frames_processed: AtomicU64,
    track_count: AtomicU32,
    is_running: AtomicBool,
}

impl InstanceTracker {
    fn new() -> Self {
        Self {
            start_time_ms: AtomicI64::new(0),
            frame_rate_bits: AtomicU64::new(0f64.to_bits()),
            latency_bits: AtomicU64::new(0f64.to_bits()),
            frames_processed: AtomicU64::new(0),
            track_count: AtomicU32::new(0),
            is_running: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> InstanceStatistics {
        InstanceStatistics {
            start_time_ms: self.start_time_ms.load(Ordering::Relaxed),
            frame_rate: f64::from_bits(self.frame_rate_bits.load(Ordering::Relaxed)),
            latency_ms: f64::from_bits(self.latency_bits.load(Ordering::Relaxed)),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            track_count: self.track_count.load(Ordering::Relaxed),
            is_running: self.is_running.load(Ordering::Relaxed),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Collector owning one tracker per instance.
#[derive(Default)]
pub struct StatsCollector {
    trackers: RwLock<HashMap<String, Arc<InstanceTracker>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracker(&self, instance_id: &str) -> Option<Arc<InstanceTracker>> {
        self.trackers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .cloned()
    }

    /// Begins tracking an instance. Stamps the start time; re-tracking an
    /// already-tracked instance refreshes the stamp (never backwards).
    pub fn start_tracking(&self, instance_id: &str) {
        let tracker = {
            let mut map = self.trackers.write().unwrap_or_else(PoisonError::into_inner);
            map.entry(instance_id.to_string()).or_insert_with(|| Arc::new(InstanceTracker::new())).clone()
        };
        let stamp = now_ms();
        // Non-decreasing start time.
        tracker.start_time_ms.fetch_max(stamp, Ordering::Relaxed);
        tracker.is_running.store(true, Ordering::Relaxed);
    }

    pub fn stop_tracking(&self, instance_id: &str) {
        if let Some(tracker) = self.tracker(instance_id) {
            tracker.is_running.store(false, Ordering::Relaxed);
        }
    }

    /// Drops the tracker and its counters.
    pub fn clear(&self, instance_id: &str) {
        self.trackers.write().unwrap_or_else(PoisonError::into_inner).remove(instance_id);
    }

    /// Adds processed frames. Monotone by construction.
    pub fn add_frames(&self, instance_id: &str, frames: u64) {
        if let Some(tracker) = self.tracker(instance_id) {
            tracker.frames_processed.fetch_add(frames, Ordering::Relaxed);
        }
    }

    pub fn record_rates(&self, instance_id: &str, frame_rate: f64, latency_ms: f64) {
        if let Some(tracker) = self.tracker(instance_id) {
            tracker.frame_rate_bits.store(frame_rate.to_bits(), Ordering::Relaxed);
            tracker.latency_bits.store(latency_ms.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn set_track_count(&self, instance_id: &str, count: u32) {
        if let Some(tracker) = self.tracker(instance_id) {
            tracker.track_count.store(count, Ordering::Relaxed);
        }
    }

    /// Latest snapshot; stale is allowed, `None` on unknown id.
    pub fn snapshot(&self, instance_id: &str) -> Option<InstanceStatistics> {
        self.tracker(instance_id).map(|t| t.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lifecycle() {
        let collector = StatsCollector::new();
        assert!(collector.snapshot("i1").is_none());

        collector.start_tracking("i1");
        let snap = collector.snapshot("i1").expect("tracked");
        assert!(snap.is_running);
        assert!(snap.start_time_ms > 0);

        collector.stop_tracking("i1");
        assert!(!collector.snapshot("i1").expect("tracked").is_running);

        collector.clear("i1");
        assert!(collector.snapshot("i1").is_none());
    }

    #[test]
    fn test_frames_are_monotone() {
        let collector = StatsCollector::new();
        collector.start_tracking("i1");
        let mut last = 0;
        for _ in 0..10 {
            collector.add_frames("i1", 3);
            let frames = collector.snapshot("i1").expect("tracked").frames_processed;
            assert!(frames >= last);
            last = frames;
        }
        assert_eq!(last, 30);
    }

    #[test]
    fn test_restart_does_not_rewind_start_time() {
        let collector = StatsCollector::new();
        collector.start_tracking("i1");
        let first = collector.snapshot("i1").expect("tracked").start_time_ms;
        collector.stop_tracking("i1");
        collector.start_tracking("i1");
        let second = collector.snapshot("i1").expect("tracked").start_time_ms;
        assert!(second >= first);
    }

    #[test]
    fn test_rates_round_trip() {
        let collector = StatsCollector::new();
        collector.start_tracking("i1");
        collector.record_rates("i1", 29.97, 42.5);
        collector.set_track_count("i1", 7);
        let snap = collector.snapshot("i1").expect("tracked");
        assert!((snap.frame_rate - 29.97).abs() < f64::EPSILON);
        assert!((snap.latency_ms - 42.5).abs() < f64::EPSILON);
        assert_eq!(snap.track_count, 7);
    }
}
