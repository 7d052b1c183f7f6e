//! Battery-aware throttling
//!
//! Inspects battery level and charging state and recommends whether
//! generation work should be throttled. The recommendation is advisory:
//! the orchestrator may shrink the response budget, but nothing here ever
//! cancels work. All probe failures degrade to "do not throttle".

#[cfg(any(target_os = "windows", target_os = "macos"))]
use std::process::Command;

/// Battery level below which generation is throttled when discharging
const LOW_BATTERY_LEVEL: f32 = 0.20;

/// Advisory throttle recommendation
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleDecision {
    pub throttle: bool,
    pub reason: Option<String>,
}

impl ThrottleDecision {
    fn no() -> Self {
        Self {
            throttle: false,
            reason: None,
        }
    }
}

/// A single battery observation
#[derive(Debug, Clone, Copy, PartialEq)]
struct BatteryReading {
    /// Charge level in [0.0, 1.0]
    level: f32,
    /// True when charging or full (on external power)
    charging: bool,
}

/// Should generation be throttled right now?
///
/// Availability wins over optimization: an unknown battery level or a
/// failed query never throttles.
pub fn should_throttle() -> ThrottleDecision {
    let reading = read_battery();
    if reading.is_none() {
        tracing::debug!("Battery state unavailable, not throttling");
    }
    decide(reading)
}

/// Pure throttle policy over an optional battery reading
fn decide(reading: Option<BatteryReading>) -> ThrottleDecision {
    match reading {
        Some(r) if r.level < LOW_BATTERY_LEVEL && !r.charging => ThrottleDecision {
            throttle: true,
            reason: Some("Low battery".to_string()),
        },
        _ => ThrottleDecision::no(),
    }
}

/// Read the battery state (best effort)
fn read_battery() -> Option<BatteryReading> {
    #[cfg(target_os = "linux")]
    {
        return read_battery_linux();
    }

    #[cfg(target_os = "macos")]
    {
        return read_battery_macos();
    }

    #[cfg(target_os = "windows")]
    {
        return read_battery_windows();
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

// =============================================================================
// Linux battery monitoring (sysfs)
// =============================================================================

#[cfg(target_os = "linux")]
fn read_battery_linux() -> Option<BatteryReading> {
    let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;

    for entry in entries.flatten() {
        let path = entry.path();
        let kind = std::fs::read_to_string(path.join("type")).unwrap_or_default();
        if kind.trim() != "Battery" {
            continue;
        }

        let capacity = std::fs::read_to_string(path.join("capacity")).ok()?;
        let status = std::fs::read_to_string(path.join("status")).unwrap_or_default();
        return battery_from_sysfs(&capacity, &status);
    }

    None
}

/// Build a reading from sysfs "capacity" (0-100) and "status" strings
#[cfg(any(target_os = "linux", test))]
fn battery_from_sysfs(capacity: &str, status: &str) -> Option<BatteryReading> {
    let percent = capacity.trim().parse::<u32>().ok()?;
    let status = status.trim();
    Some(BatteryReading {
        level: (percent.min(100)) as f32 / 100.0,
        charging: status == "Charging" || status == "Full",
    })
}

// =============================================================================
// macOS battery monitoring
// =============================================================================

#[cfg(target_os = "macos")]
fn read_battery_macos() -> Option<BatteryReading> {
    let output = Command::new("pmset").args(["-g", "batt"]).output().ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_pmset(&stdout)
}

/// Parse pmset -g batt output, e.g.
/// " -InternalBattery-0 (id=...)\t85%; discharging; 3:02 remaining ..."
#[cfg(any(target_os = "macos", test))]
fn parse_pmset(output: &str) -> Option<BatteryReading> {
    for line in output.lines() {
        if !line.contains("InternalBattery") {
            continue;
        }

        let percent_pos = line.find('%')?;
        let before = &line[..percent_pos];
        let digits: String = before
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let percent = digits.parse::<u32>().ok()?;

        let charging = line.contains("; charging") || line.contains("; charged")
            || line.contains("; finishing charge") || line.contains("AC attached");

        return Some(BatteryReading {
            level: (percent.min(100)) as f32 / 100.0,
            charging,
        });
    }

    None
}

// =============================================================================
// Windows battery monitoring
// =============================================================================

#[cfg(target_os = "windows")]
fn read_battery_windows() -> Option<BatteryReading> {
    let output = Command::new("wmic")
        .args([
            "path",
            "Win32_Battery",
            "get",
            "EstimatedChargeRemaining,BatteryStatus",
            "/Value",
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_wmic_battery(&stdout)
}

/// Parse WMIC Win32_Battery key=value output
///
/// BatteryStatus 1 means discharging; 2 and 6-9 mean the unit is on
/// external power in some form.
#[cfg(any(target_os = "windows", test))]
fn parse_wmic_battery(output: &str) -> Option<BatteryReading> {
    let mut percent: Option<u32> = None;
    let mut status: Option<u32> = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("EstimatedChargeRemaining=") {
            percent = value.trim().parse::<u32>().ok();
        } else if let Some(value) = line.strip_prefix("BatteryStatus=") {
            status = value.trim().parse::<u32>().ok();
        }
    }

    let percent = percent?;
    let status = status?;
    Some(BatteryReading {
        level: (percent.min(100)) as f32 / 100.0,
        charging: matches!(status, 2 | 6 | 7 | 8 | 9),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_level_never_throttles() {
        let decision = decide(None);
        assert!(!decision.throttle);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn test_low_and_discharging_throttles() {
        let decision = decide(Some(BatteryReading {
            level: 0.15,
            charging: false,
        }));
        assert!(decision.throttle);
        assert_eq!(decision.reason.as_deref(), Some("Low battery"));
    }

    #[test]
    fn test_low_but_charging_does_not_throttle() {
        let decision = decide(Some(BatteryReading {
            level: 0.15,
            charging: true,
        }));
        assert!(!decision.throttle);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let decision = decide(Some(BatteryReading {
            level: 0.20,
            charging: false,
        }));
        assert!(!decision.throttle);
    }

    #[test]
    fn test_should_throttle_never_panics() {
        let _ = should_throttle();
    }

    #[test]
    fn test_sysfs_parsing() {
        let reading = battery_from_sysfs("42\n", "Discharging\n").unwrap();
        assert_eq!(reading.level, 0.42);
        assert!(!reading.charging);

        let reading = battery_from_sysfs("100\n", "Full\n").unwrap();
        assert!(reading.charging);

        assert!(battery_from_sysfs("garbage", "Charging").is_none());
    }

    #[test]
    fn test_pmset_parsing() {
        let sample = "Now drawing from 'Battery Power'\n -InternalBattery-0 (id=1234)\t15%; discharging; 1:02 remaining present: true\n";
        let reading = parse_pmset(sample).unwrap();
        assert_eq!(reading.level, 0.15);
        assert!(!reading.charging);

        let sample = "Now drawing from 'AC Power'\n -InternalBattery-0 (id=1234)\t15%; charging; 1:02 remaining present: true\n";
        let reading = parse_pmset(sample).unwrap();
        assert!(reading.charging);

        assert!(parse_pmset("no battery here").is_none());
    }

    #[test]
    fn test_wmic_parsing() {
        let sample = "BatteryStatus=1\r\nEstimatedChargeRemaining=18\r\n";
        let reading = parse_wmic_battery(sample).unwrap();
        assert_eq!(reading.level, 0.18);
        assert!(!reading.charging);

        let sample = "BatteryStatus=2\r\nEstimatedChargeRemaining=18\r\n";
        assert!(parse_wmic_battery(sample).unwrap().charging);
    }
}
