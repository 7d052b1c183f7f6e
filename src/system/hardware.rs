//! Hardware profile estimation
//!
//! Inspects total device memory and recommends a model configuration
//! (quantization tier and context window) the device can sustain.

use crate::types::{ModelConfig, Quantization};

#[cfg(any(target_os = "windows", target_os = "macos"))]
use std::process::Command;

/// Conservative fallback when the memory query is unavailable (4 GiB)
const DEFAULT_TOTAL_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Memory below this gets the lowest quantization tier and a small context
const LOW_MEMORY_THRESHOLD: u64 = 4 * 1024 * 1024 * 1024;

/// Recommend a model configuration for this device
///
/// Never fails: if the memory query is unavailable the conservative
/// default is used. The only side effect is the query itself.
pub fn recommend_config() -> ModelConfig {
    let total = detect_total_memory().unwrap_or_else(|| {
        tracing::warn!("Total memory unavailable, assuming 4 GiB");
        DEFAULT_TOTAL_MEMORY
    });

    let config = config_for_total_memory(total);
    tracing::info!(
        "Device memory: {} MB -> {} / {} ctx",
        total / 1024 / 1024,
        config.quantization.tag(),
        config.context_size
    );
    config
}

/// Pure policy: memory below 4 GiB gets the low tier and a 1024-token
/// context, everything else the higher tier and 2048 tokens.
pub fn config_for_total_memory(total_bytes: u64) -> ModelConfig {
    if total_bytes < LOW_MEMORY_THRESHOLD {
        ModelConfig {
            quantization: Quantization::Q4_0,
            context_size: 1024,
        }
    } else {
        ModelConfig {
            quantization: Quantization::Q8_0,
            context_size: 2048,
        }
    }
}

/// Get total physical memory in bytes (best effort)
pub fn detect_total_memory() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        return detect_total_memory_linux();
    }

    #[cfg(target_os = "macos")]
    {
        return detect_total_memory_macos();
    }

    #[cfg(target_os = "windows")]
    {
        return detect_total_memory_windows();
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

// =============================================================================
// Linux memory detection
// =============================================================================

#[cfg(target_os = "linux")]
fn detect_total_memory_linux() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&meminfo)
}

/// Parse "MemTotal:       16384000 kB" out of /proc/meminfo
#[cfg(any(target_os = "linux", test))]
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb = rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

// =============================================================================
// macOS memory detection
// =============================================================================

/// Get total RAM via sysctl hw.memsize (returns bytes)
#[cfg(target_os = "macos")]
fn detect_total_memory_macos() -> Option<u64> {
    let output = Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let bytes_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
    bytes_str.parse::<u64>().ok()
}

// =============================================================================
// Windows memory detection
// =============================================================================

#[cfg(target_os = "windows")]
fn detect_total_memory_windows() -> Option<u64> {
    let output = Command::new("wmic")
        .args(["OS", "get", "TotalVisibleMemorySize", "/Value"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("TotalVisibleMemorySize=") {
            if let Ok(kb) = value.trim().parse::<u64>() {
                return Some(kb * 1024);
            }
        }
    }
    None
}
