// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! System configuration store.
//!
//! One JSON-shaped tree guarded by a reader/writer lock. Paths are dotted or
//! slash-separated; mutations are atomic with respect to reads. The tree is
//! file-backed: defaults are seeded (and written out) when the persistent
//! file is missing, and `reset_defaults` rewrites it.

use crate::error::{Result, VisionKitError};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

struct StoreInner {
    tree: Value,
    path: Option<PathBuf>,
    loaded: bool,
}

/// Thread-safe in-memory JSON config with dotted-path access.
pub struct ConfigStore {
    inner: RwLock<StoreInner>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// In-memory store seeded with the default tree.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner { tree: default_tree(), path: None, loaded: true }),
        }
    }

    /// File-backed store. Seeds and writes the defaults when the file is
    /// missing; falls back to defaults (unsaved) on a parse failure.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = Self::new();

        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(VisionKitError::from)
                .and_then(|raw| {
                    serde_json::from_str::<Value>(&raw)
                        .map_err(|e| VisionKitError::InvalidArgument(e.to_string()))
                }) {
                Ok(tree) if tree.is_object() => {
                    let mut inner = store.write();
                    inner.tree = tree;
                    inner.path = Some(path.clone());
                    inner.loaded = true;
                    tracing::info!(path = %path.display(), "Loaded system config");
                },
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Config file unreadable or not an object, using defaults"
                    );
                    let mut inner = store.write();
                    inner.path = Some(path.clone());
                    inner.loaded = false;
                },
            }
        } else {
            tracing::info!(path = %path.display(), "Config file missing, seeding defaults");
            {
                let mut inner = store.write();
                inner.path = Some(path.clone());
            }
            if let Err(e) = store.save() {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist default config");
            }
        }

        store
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the whole tree.
    pub fn root(&self) -> Value {
        self.read().tree.clone()
    }

    /// Returns the value at `path`, or `NotFound`. An empty path returns the
    /// root.
    pub fn get(&self, path: &str) -> Result<Value> {
        let inner = self.read();
        if path.is_empty() {
            return Ok(inner.tree.clone());
        }

        let keys = split_path(path);
        let mut current = &inner.tree;
        for key in &keys {
            current = current
                .get(key)
                .ok_or_else(|| VisionKitError::NotFound(format!("config path '{path}'")))?;
        }
        Ok(current.clone())
    }

    /// Merges `value` at `path`, creating intermediate objects as needed.
    /// When both the existing entry and `value` are objects they are merged
    /// recursively (matching keys overlaid); otherwise the entry is replaced.
    /// An empty path merges into the root, where `value` must be an object.
    pub fn set_merge(&self, path: &str, value: Value) -> Result<()> {
        let mut inner = self.write();

        if path.is_empty() {
            let Value::Object(update) = value else {
                return Err(VisionKitError::InvalidArgument(
                    "root config value must be an object".to_string(),
                ));
            };
            let root =
                inner.tree.as_object_mut().ok_or_else(|| {
                    VisionKitError::Internal("config root is not an object".to_string())
                })?;
            for (key, entry) in update {
                merge_entry(root, key, entry);
            }
            return Ok(());
        }

        let keys = split_path(path);
        if keys.is_empty() {
            return Err(VisionKitError::InvalidArgument(format!("invalid config path '{path}'")));
        }

        let mut current = &mut inner.tree;
        for key in &keys[..keys.len() - 1] {
            let obj = current.as_object_mut().ok_or_else(|| {
                VisionKitError::InvalidArgument(format!(
                    "config path '{path}' crosses a non-object value"
                ))
            })?;
            current = obj.entry(key.clone()).or_insert_with(|| json!({}));
        }

        let obj = current.as_object_mut().ok_or_else(|| {
            VisionKitError::InvalidArgument(format!(
                "config path '{path}' crosses a non-object value"
            ))
        })?;
        // Safe: keys is non-empty.
        let last = keys[keys.len() - 1].clone();
        merge_entry(obj, last, value);
        Ok(())
    }

    /// Substitutes the whole tree. The value must be an object.
    pub fn set_replace(&self, value: Value) -> Result<()> {
        if !value.is_object() {
            return Err(VisionKitError::InvalidArgument(
                "config root must be an object".to_string(),
            ));
        }
        self.write().tree = value;
        Ok(())
    }

    /// Deletes the entry at `path`. Returns false when the path is absent
    /// (callers surface this as 404).
    pub fn delete(&self, path: &str) -> bool {
        let mut inner = self.write();
        let keys = split_path(path);
        if keys.is_empty() {
            return false;
        }

        let mut current = &mut inner.tree;
        for key in &keys[..keys.len() - 1] {
            match current.get_mut(key) {
                Some(next) if next.is_object() => current = next,
                _ => return false,
            }
        }

        current
            .as_object_mut()
            .is_some_and(|obj| obj.remove(&keys[keys.len() - 1]).is_some())
    }

    /// Restores the default tree and rewrites the persistent file when one is
    /// configured.
    pub fn reset_defaults(&self) -> Result<()> {
        {
            let mut inner = self.write();
            inner.tree = default_tree();
            inner.loaded = true;
        }
        self.save()
    }

    /// Writes the tree to the configured path. No-op without one.
    pub fn save(&self) -> Result<()> {
        // Snapshot under the lock, write outside it.
        let (tree, path) = {
            let inner = self.read();
            match &inner.path {
                Some(path) => (inner.tree.clone(), path.clone()),
                None => return Ok(()),
            }
        };
        write_json(&path, &tree)
    }

    /// Re-reads the persistent file. The lock is released before the reload
    /// to avoid self-deadlock.
    pub fn reload(&self) -> Result<()> {
        let path = self.read().path.clone().ok_or_else(|| {
            VisionKitError::PreconditionFailed("config store has no backing file".to_string())
        })?;

        let raw = std::fs::read_to_string(&path)?;
        let tree: Value = serde_json::from_str(&raw)
            .map_err(|e| VisionKitError::InvalidArgument(format!("invalid config file: {e}")))?;
        if !tree.is_object() {
            return Err(VisionKitError::InvalidArgument(
                "config root must be an object".to_string(),
            ));
        }

        let mut inner = self.write();
        inner.tree = tree;
        inner.loaded = true;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.read().loaded
    }

    /// The admission cap. 0 means unlimited.
    pub fn max_running_instances(&self) -> usize {
        self.get("system.max_running_instances")
            .ok()
            .and_then(|v| v.as_u64())
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(0)
    }

    /// Decoder priority tags, most preferred first.
    pub fn decoder_priority_list(&self) -> Vec<String> {
        self.get("decoder_priority_list")
            .ok()
            .and_then(|v| {
                v.as_array().map(|items| {
                    items.iter().filter_map(|i| i.as_str().map(String::from)).collect()
                })
            })
            .unwrap_or_default()
    }
}

fn merge_entry(target: &mut Map<String, Value>, key: String, value: Value) {
    match (target.get_mut(&key), value) {
        (Some(Value::Object(existing)), Value::Object(update)) => {
            for (k, v) in update {
                merge_entry(existing, k, v);
            }
        },
        (_, value) => {
            target.insert(key, value);
        },
    }
}

/// Splits on `/` when one is present, else on `.`; empty segments dropped.
fn split_path(path: &str) -> Vec<String> {
    let delimiter = if path.contains('/') { '/' } else { '.' };
    path.split(delimiter).filter(|s| !s.is_empty()).map(String::from).collect()
}

fn write_json(path: &Path, tree: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pretty = serde_json::to_string_pretty(tree)
        .map_err(|e| VisionKitError::Internal(e.to_string()))?;
    std::fs::write(path, pretty)?;
    tracing::info!(path = %path.display(), "Saved system config");
    Ok(())
}

/// The default configuration tree.
fn default_tree() -> Value {
    json!({
        "auto_device_list": [
            "hailo.auto", "blaize.auto", "tensorrt.1", "rknn.auto", "tensorrt.2",
            "cavalry", "openvino.VPU", "openvino.GPU", "openvino.CPU",
            "snpe.dsp", "snpe.aip", "mnn.auto",
            "armnn.GpuAcc", "armnn.CpuAcc", "armnn.CpuRef",
            "memx.memx", "memx.cpu"
        ],
        "decoder_priority_list": [
            "blaize.auto", "rockchip", "nvidia.1", "intel.1", "software"
        ],
        "gstreamer": {
            "decode_pipelines": {
                "auto": {
                    "pipeline": "decodebin ! videoconvert",
                    "capabilities": ["H264", "HEVC", "VP9", "VC1", "AV1", "MJPEG"]
                },
                "jetson": {
                    "pipeline": "parsebin ! nvv4l2decoder ! nvvidconv",
                    "capabilities": ["H264", "HEVC"]
                },
                "nvidia": {
                    "pipeline": "decodebin ! nvvideoconvert ! videoconvert",
                    "capabilities": ["H264", "HEVC", "VP9", "AV1", "MJPEG"]
                },
                "msdk": {
                    "pipeline": "decodebin ! msdkvpp ! videoconvert",
                    "capabilities": ["H264", "HEVC", "VP9", "VC1"]
                },
                "vaapi": {
                    "pipeline": "decodebin ! vaapipostproc ! videoconvert",
                    "capabilities": ["H264", "HEVC", "VP9", "AV1"]
                }
            },
            "plugin_rank": {
                "nvv4l2decoder": "257",
                "nvjpegdec": "257",
                "nvvidconv": "257",
                "msdkvpp": "257",
                "vaapipostproc": "257",
                "qsvh264dec": "300",
                "qsvh265dec": "300",
                "nvh264dec": "257",
                "nvh265dec": "257",
                "mppvideodec": "256",
                "mppjpegdec": "256"
            }
        },
        "system": {
            "web_server": {
                "enabled": true,
                "ip_address": "0.0.0.0",
                "port": 3546,
                "name": "default",
                "cors": { "enabled": false }
            },
            "logging": {
                "log_file": "logs/api.log",
                "log_level": "debug",
                "max_log_file_size": 52_428_800,
                "max_log_files": 3
            },
            "max_running_instances": 0,
            "modelforge_permissive": false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing_round_trip() {
        let store = ConfigStore::new();
        store.set_merge("a.b.c", json!(42)).expect("set");
        assert_eq!(store.get("a/b/c").expect("get"), json!(42));

        store.set_merge("x/y", json!("v")).expect("set");
        assert_eq!(store.get("x.y").expect("get"), json!("v"));
    }

    #[test]
    fn test_merge_idempotence() {
        let store = ConfigStore::new();
        store.set_merge("system.web_server", json!({"port": 4000})).expect("set");
        let once = store.root();
        store.set_merge("system.web_server", json!({"port": 4000})).expect("set");
        assert_eq!(store.root(), once);
    }

    #[test]
    fn test_merge_overlays_matching_keys() {
        let store = ConfigStore::new();
        store.set_merge("system.web_server", json!({"port": 4000})).expect("set");
        assert_eq!(store.get("system.web_server.port").expect("port"), json!(4000));
        // Sibling keys survive the merge.
        assert_eq!(store.get("system.web_server.name").expect("name"), json!("default"));
    }

    #[test]
    fn test_replace_dominance() {
        let store = ConfigStore::new();
        store.set_merge("a.b", json!(1)).expect("set");
        let replacement = json!({"only": "this"});
        store.set_replace(replacement.clone()).expect("replace");
        assert_eq!(store.get("").expect("root"), replacement);
        assert!(store.get("a.b").is_err());
    }

    #[test]
    fn test_replace_rejects_non_object() {
        let store = ConfigStore::new();
        assert!(matches!(
            store.set_replace(json!([1, 2, 3])),
            Err(VisionKitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_delete_absent_returns_false() {
        let store = ConfigStore::new();
        assert!(!store.delete("system.no_such_key"));
        assert!(store.delete("system.web_server"));
        assert!(!store.delete("system.web_server"));
        assert!(store.get("system.web_server").is_err());
    }

    #[test]
    fn test_defaults_seeded() {
        let store = ConfigStore::new();
        assert_eq!(store.max_running_instances(), 0);
        assert_eq!(
            store.decoder_priority_list(),
            vec!["blaize.auto", "rockchip", "nvidia.1", "intel.1", "software"]
        );
        assert_eq!(store.get("system.web_server.port").expect("port"), json!(3546));
    }

    #[test]
    fn test_reset_defaults() {
        let store = ConfigStore::new();
        store.set_replace(json!({"stripped": true})).expect("replace");
        store.reset_defaults().expect("reset");
        assert_eq!(store.get("system.web_server.port").expect("port"), json!(3546));
    }

    #[test]
    fn test_file_persistence_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let store = ConfigStore::load(&path);
        assert!(path.exists(), "defaults are written when the file is missing");

        store.set_merge("system.max_running_instances", json!(4)).expect("set");
        store.save().expect("save");

        let reopened = ConfigStore::load(&path);
        assert_eq!(reopened.max_running_instances(), 4);

        // External edit picked up by reload.
        std::fs::write(&path, serde_json::to_string(&json!({"system": {"max_running_instances": 9}})).expect("json"))
            .expect("write");
        reopened.reload().expect("reload");
        assert_eq!(reopened.max_running_instances(), 9);
    }
}
