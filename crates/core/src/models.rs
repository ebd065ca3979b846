// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Model file resolver.
//!
//! Maps a relative model reference (a path like `models/face/yunet.onnx` or a
//! bare model name plus category) to an absolute file path using an ordered
//! search chain. First existing file wins:
//!
//! 1. `$CVEDIX_DATA_ROOT/<ref>`
//! 2. `$CVEDIX_SDK_ROOT/cvedix_data/<ref>`
//! 3. Production install root (`/opt/edge_ai_api/models/...`)
//! 4. System data dirs (`/usr/share/...`, `/usr/local/share/...`)
//! 5. SDK source-tree relatives (`../edge_ai_sdk/cvedix_data/...`)
//! 6. Working-directory development fallback (`./cvedix_data/...`)

use std::path::{Path, PathBuf};

/// Production install root for models, videos and recordings.
pub const PRODUCTION_ROOT: &str = "/opt/edge_ai_api";

/// Known model file extensions tried during bare-name lookup.
pub const MODEL_EXTENSIONS: &[&str] =
    &[".onnx", ".rknn", ".weights", ".pt", ".pth", ".pb", ".tflite"];

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolves a relative model reference against the search chain, reading the
/// environment roots. `None` on miss.
pub fn resolve_model_path(relative: &str) -> Option<String> {
    resolve_model_path_from(
        env_non_empty("CVEDIX_DATA_ROOT").as_deref(),
        env_non_empty("CVEDIX_SDK_ROOT").as_deref(),
        relative,
    )
}

/// Search-chain resolution with explicit roots (testable without touching the
/// process environment).
pub fn resolve_model_path_from(
    data_root: Option<&str>,
    sdk_root: Option<&str>,
    relative: &str,
) -> Option<String> {
    for candidate in candidate_paths(data_root, sdk_root, relative) {
        if candidate.is_file() {
            tracing::info!(path = %candidate.display(), reference = %relative, "Resolved model path");
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    tracing::warn!(reference = %relative, "Model reference did not resolve to an existing file");
    None
}

fn candidate_paths(
    data_root: Option<&str>,
    sdk_root: Option<&str>,
    relative: &str,
) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(root) = data_root {
        candidates.push(Path::new(root).join(relative));
    }
    if let Some(root) = sdk_root {
        candidates.push(Path::new(root).join("cvedix_data").join(relative));
    }

    // Production install root, with and without a leading `models/` component.
    if let Some(stripped) = relative.strip_prefix("models/") {
        candidates.push(Path::new(PRODUCTION_ROOT).join("models").join(stripped));
    }
    candidates.push(Path::new(PRODUCTION_ROOT).join("models").join(relative));

    for system_root in [
        "/usr/share/cvedix/cvedix_data",
        "/usr/local/share/cvedix/cvedix_data",
        "/usr/include/cvedix/cvedix_data",
        "/usr/local/include/cvedix/cvedix_data",
    ] {
        candidates.push(Path::new(system_root).join(relative));
    }

    for sdk_relative in
        ["../edge_ai_sdk/cvedix_data", "../../edge_ai_sdk/cvedix_data", "../../../edge_ai_sdk/cvedix_data"]
    {
        candidates.push(Path::new(sdk_relative).join(relative));
    }

    candidates.push(Path::new("./cvedix_data").join(relative));
    candidates
}

/// Resolves a bare model name (e.g. `yunet_2023mar`) within a category by
/// trying known extensions and naming patterns under each candidate
/// directory. A case-insensitive contains-match is accepted as a last
/// resort. `None` on miss.
pub fn resolve_model_by_name(model_name: &str, category: &str) -> Option<String> {
    resolve_model_by_name_from(
        env_non_empty("CVEDIX_DATA_ROOT").as_deref(),
        env_non_empty("CVEDIX_SDK_ROOT").as_deref(),
        model_name,
        category,
    )
}

pub fn resolve_model_by_name_from(
    data_root: Option<&str>,
    sdk_root: Option<&str>,
    model_name: &str,
    category: &str,
) -> Option<String> {
    let patterns = name_patterns(model_name, category);

    for dir in search_dirs(data_root, sdk_root, category) {
        if !dir.is_dir() {
            continue;
        }

        for pattern in &patterns {
            for ext in MODEL_EXTENSIONS {
                let candidate = dir.join(format!("{pattern}{ext}"));
                if candidate.is_file() {
                    tracing::info!(
                        model = %model_name,
                        path = %candidate.display(),
                        "Resolved model by name"
                    );
                    return Some(candidate.to_string_lossy().into_owned());
                }
            }
        }

        // Last resort: case-insensitive contains-match over the directory.
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.filter_map(std::result::Result::ok) {
                let file_name = entry.file_name().to_string_lossy().to_lowercase();
                let is_model = MODEL_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext));
                if is_model && file_name.contains(&model_name.to_lowercase()) {
                    let path = entry.path();
                    tracing::info!(
                        model = %model_name,
                        matched = %file_name,
                        path = %path.display(),
                        "Resolved model by case-insensitive match"
                    );
                    return Some(path.to_string_lossy().into_owned());
                }
            }
        }
    }

    None
}

fn name_patterns(model_name: &str, category: &str) -> Vec<String> {
    let mut patterns = vec![model_name.to_string()];

    if model_name.contains("yunet") || model_name.contains("face") {
        patterns.push(format!("face_detection_{model_name}"));
        patterns.push(format!("{model_name}_face_detection"));
        if !model_name.contains("yunet") {
            patterns.push(format!("face_detection_yunet_{model_name}"));
        }
    }
    if !category.is_empty() {
        patterns.push(format!("{category}_{model_name}"));
    }
    patterns
}

fn search_dirs(data_root: Option<&str>, sdk_root: Option<&str>, category: &str) -> Vec<PathBuf> {
    let models_sub =
        if category.is_empty() { PathBuf::from("models") } else { Path::new("models").join(category) };

    let mut dirs = Vec::new();
    if let Some(root) = data_root {
        dirs.push(Path::new(root).join(&models_sub));
    }
    if let Some(root) = sdk_root {
        dirs.push(Path::new(root).join("cvedix_data").join(&models_sub));
    }

    dirs.push(Path::new(PRODUCTION_ROOT).join(&models_sub));
    dirs.push(Path::new(PRODUCTION_ROOT).join("models"));

    for system_root in ["/usr/share/cvedix/cvedix_data", "/usr/local/share/cvedix/cvedix_data"] {
        dirs.push(Path::new(system_root).join(&models_sub));
    }
    for sdk_relative in
        ["../edge_ai_sdk/cvedix_data", "../../edge_ai_sdk/cvedix_data", "../../../edge_ai_sdk/cvedix_data"]
    {
        dirs.push(Path::new(sdk_relative).join(&models_sub));
    }
    dirs.push(Path::new("./cvedix_data").join(&models_sub));
    dirs.push(PathBuf::from("./models"));
    dirs
}

/// Lists model files (by known extension) under the search chain for a
/// category, deduplicated by file name.
pub fn list_available_models(category: &str) -> Vec<String> {
    let data_root = env_non_empty("CVEDIX_DATA_ROOT");
    let sdk_root = env_non_empty("CVEDIX_SDK_ROOT");
    let mut seen = std::collections::BTreeSet::new();

    for dir in search_dirs(data_root.as_deref(), sdk_root.as_deref(), category) {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.filter_map(std::result::Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if MODEL_EXTENSIONS.iter().any(|ext| name.to_lowercase().ends_with(ext)) {
                seen.insert(name);
            }
        }
    }
    seen.into_iter().collect()
}

/// Maps a detection sensitivity label to the detector score threshold.
/// Unknown values default to Medium.
pub fn map_detection_sensitivity(sensitivity: &str) -> f32 {
    match sensitivity {
        "Low" => 0.5,
        "High" => 0.9,
        _ => 0.7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_data_root_takes_precedence() {
        let data = tempfile::tempdir().expect("data root");
        let sdk = tempfile::tempdir().expect("sdk root");

        let data_model = data.path().join("models/face");
        fs::create_dir_all(&data_model).expect("dirs");
        fs::write(data_model.join("yunet.onnx"), b"data").expect("write");

        let sdk_model = sdk.path().join("cvedix_data/models/face");
        fs::create_dir_all(&sdk_model).expect("dirs");
        fs::write(sdk_model.join("yunet.onnx"), b"sdk").expect("write");

        let resolved = resolve_model_path_from(
            Some(&data.path().to_string_lossy()),
            Some(&sdk.path().to_string_lossy()),
            "models/face/yunet.onnx",
        )
        .expect("resolved");
        assert!(resolved.starts_with(&*data.path().to_string_lossy()));
    }

    #[test]
    fn test_sdk_root_used_when_data_root_misses() {
        let data = tempfile::tempdir().expect("data root");
        let sdk = tempfile::tempdir().expect("sdk root");

        let sdk_model = sdk.path().join("cvedix_data/models/face");
        fs::create_dir_all(&sdk_model).expect("dirs");
        fs::write(sdk_model.join("yunet.onnx"), b"sdk").expect("write");

        let resolved = resolve_model_path_from(
            Some(&data.path().to_string_lossy()),
            Some(&sdk.path().to_string_lossy()),
            "models/face/yunet.onnx",
        )
        .expect("resolved");
        assert!(resolved.starts_with(&*sdk.path().to_string_lossy()));
    }

    #[test]
    fn test_resolve_by_name_patterns_and_case() {
        let data = tempfile::tempdir().expect("data root");
        let face_dir = data.path().join("models/face");
        fs::create_dir_all(&face_dir).expect("dirs");
        fs::write(face_dir.join("face_detection_yunet_2023mar.onnx"), b"m").expect("write");

        // Prefixed pattern match.
        let resolved = resolve_model_by_name_from(
            Some(&data.path().to_string_lossy()),
            None,
            "yunet_2023mar",
            "face",
        )
        .expect("resolved");
        assert!(resolved.ends_with("face_detection_yunet_2023mar.onnx"));

        // Case-insensitive contains-match fallback.
        let resolved = resolve_model_by_name_from(
            Some(&data.path().to_string_lossy()),
            None,
            "YUNET",
            "face",
        )
        .expect("resolved");
        assert!(resolved.ends_with("face_detection_yunet_2023mar.onnx"));
    }

    #[test]
    fn test_resolve_miss_returns_none() {
        let data = tempfile::tempdir().expect("data root");
        assert!(resolve_model_by_name_from(
            Some(&data.path().to_string_lossy()),
            None,
            "nonexistent_model",
            "face"
        )
        .is_none());
    }

    #[test]
    fn test_sensitivity_mapping() {
        assert!((map_detection_sensitivity("Low") - 0.5).abs() < f32::EPSILON);
        assert!((map_detection_sensitivity("Medium") - 0.7).abs() < f32::EPSILON);
        assert!((map_detection_sensitivity("High") - 0.9).abs() < f32::EPSILON);
        assert!((map_detection_sensitivity("garbage") - 0.7).abs() < f32::EPSILON);
    }
}
