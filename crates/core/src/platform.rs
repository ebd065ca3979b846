// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Host platform probe.
//!
//! Enumerates the host once per process and caches four capability booleans.
//! Every individual probe treats failure as "not present": the control plane
//! must never fail to start because of probing.

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

/// Cached capability flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformCaps {
    pub jetson: bool,
    pub nvidia: bool,
    pub msdk: bool,
    pub vaapi: bool,
}

static CAPS: OnceLock<PlatformCaps> = OnceLock::new();

/// Returns the cached capability flags, probing on first use.
pub fn platform_caps() -> PlatformCaps {
    *CAPS.get_or_init(|| {
        let caps = PlatformCaps {
            jetson: probe_jetson(),
            nvidia: probe_nvidia(),
            msdk: probe_msdk(),
            vaapi: probe_vaapi(),
        };
        tracing::info!(
            jetson = caps.jetson,
            nvidia = caps.nvidia,
            msdk = caps.msdk,
            vaapi = caps.vaapi,
            "Probed host platform"
        );
        caps
    })
}

/// Highest-priority platform label: `jetson > nvidia > msdk > vaapi > auto`.
pub fn detect_platform() -> &'static str {
    let caps = platform_caps();
    if caps.jetson {
        "jetson"
    } else if caps.nvidia {
        "nvidia"
    } else if caps.msdk {
        "msdk"
    } else if caps.vaapi {
        "vaapi"
    } else {
        "auto"
    }
}

fn model_file_mentions(path: &str, needles: &[&str]) -> bool {
    std::fs::read_to_string(path).is_ok_and(|contents| {
        let lower = contents.to_lowercase();
        needles.iter().any(|n| lower.contains(n))
    })
}

fn probe_jetson() -> bool {
    model_file_mentions("/proc/device-tree/model", &["jetson", "tegra"])
        || model_file_mentions("/sys/firmware/devicetree/base/model", &["jetson", "tegra"])
}

fn command_has_output(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .is_ok_and(|out| out.status.success() && !out.stdout.is_empty())
}

fn probe_nvidia() -> bool {
    if command_has_output("nvidia-smi", &["--query-gpu=name", "--format=csv,noheader"]) {
        return true;
    }
    Path::new("/dev/nvidia0").exists()
}

fn ldconfig_lists(library: &str) -> bool {
    Command::new("ldconfig").arg("-p").output().is_ok_and(|out| {
        out.status.success() && String::from_utf8_lossy(&out.stdout).contains(library)
    })
}

fn probe_msdk() -> bool {
    ldconfig_lists("libmfx") || command_has_output("which", &["intel_gpu_top"])
}

fn probe_vaapi() -> bool {
    if ldconfig_lists("libva") {
        return true;
    }
    std::fs::read_dir("/dev/dri").is_ok_and(|entries| {
        entries
            .filter_map(std::result::Result::ok)
            .any(|e| e.file_name().to_string_lossy().starts_with("renderD"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform_never_fails() {
        let label = detect_platform();
        assert!(matches!(label, "jetson" | "nvidia" | "msdk" | "vaapi" | "auto"));
        // Second call hits the cache and agrees.
        assert_eq!(detect_platform(), label);
    }
}
