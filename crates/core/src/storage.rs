// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! File-backed node pool snapshot.
//!
//! Schema of `<storage_dir>/nodes.json`:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "total": 2,
//!   "nodes": [
//!     {"nodeId": "...", "templateId": "...", "parameters": {...},
//!      "inUse": false, "createdAt": "2025-01-01T00:00:00Z"}
//!   ]
//! }
//! ```

use crate::error::{Result, VisionKitError};
use crate::pool::{NodePool, PreConfiguredNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;

const SNAPSHOT_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    #[serde(rename = "nodeId")]
    node_id: String,
    #[serde(rename = "templateId")]
    template_id: String,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
    #[serde(rename = "inUse", default)]
    in_use: bool,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: String,
    total: usize,
    nodes: Vec<NodeRecord>,
}

fn system_time_to_rfc3339(time: SystemTime) -> String {
    time::OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn rfc3339_to_system_time(raw: &str) -> SystemTime {
    time::OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .and_then(|dt| {
            let unix = dt.unix_timestamp();
            u64::try_from(unix).ok().map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        })
        .unwrap_or(UNIX_EPOCH)
}

/// Persists pre-configured nodes as JSON under a storage directory.
pub struct NodeStorage {
    storage_dir: PathBuf,
}

impl NodeStorage {
    /// Creates the storage, attempting to create the directory up front.
    /// Directory creation failure is not fatal; saving retries it.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        let storage_dir = storage_dir.into();
        if let Err(e) = std::fs::create_dir_all(&storage_dir) {
            tracing::warn!(
                dir = %storage_dir.display(),
                error = %e,
                "Could not create node storage directory; will retry on save"
            );
        }
        Self { storage_dir }
    }

    pub fn nodes_file(&self) -> PathBuf {
        self.storage_dir.join("nodes.json")
    }

    /// Loads the snapshot and merges it into the pool, skipping ids that
    /// already exist. Returns the number of nodes added; a missing file
    /// yields zero.
    pub fn load_into(&self, pool: &NodePool) -> Result<usize> {
        let path = self.nodes_file();
        if !path.exists() {
            return Ok(0);
        }

        let raw = std::fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| VisionKitError::InvalidArgument(format!("invalid nodes file: {e}")))?;

        let mut added = 0;
        for record in snapshot.nodes {
            let node = PreConfiguredNode {
                node_id: record.node_id,
                template_id: record.template_id,
                parameters: record.parameters,
                in_use: record.in_use,
                created_at: rfc3339_to_system_time(&record.created_at),
            };
            if pool.insert_loaded(node) {
                added += 1;
            }
        }
        tracing::info!(added, path = %path.display(), "Loaded node pool snapshot");
        Ok(added)
    }

    /// Writes the pool's pre-configured nodes to disk.
    pub fn save_from(&self, pool: &NodePool) -> Result<()> {
        std::fs::create_dir_all(&self.storage_dir)?;

        let nodes: Vec<NodeRecord> = pool
            .list()
            .into_iter()
            .map(|n| NodeRecord {
                node_id: n.node_id,
                template_id: n.template_id,
                parameters: n.parameters,
                in_use: n.in_use,
                created_at: system_time_to_rfc3339(n.created_at),
            })
            .collect();

        let snapshot =
            Snapshot { version: SNAPSHOT_VERSION.to_string(), total: nodes.len(), nodes };
        let pretty = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| VisionKitError::Internal(e.to_string()))?;
        std::fs::write(self.nodes_file(), pretty)?;
        tracing::info!(total = snapshot.total, path = %self.nodes_file().display(), "Saved node pool snapshot");
        Ok(())
    }
}
