//! System snapshot read from `/proc`.
//!
//! | Field                | Source                                        |
//! |----------------------|-----------------------------------------------|
//! | `hostname`           | `/proc/sys/kernel/hostname`                   |
//! | `kernel`             | `/proc/version`                               |
//! | `system_uptime_secs` | `/proc/uptime`                                |
//! | `cpu_model`          | `/proc/cpuinfo` (`model name` or `Hardware`)  |
//! | `load_average`       | `/proc/loadavg`                               |
//! | `memory`             | `/proc/meminfo`                               |

use serde::Serialize;

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memory {
    pub total_kb: u64,
    pub available_kb: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub kernel: String,
    pub system_uptime_secs: u64,
    pub cpu_model: String,
    pub load_average: Vec<f64>,
    pub memory: Memory,
}

/// Raw contents of the files a snapshot is built from.
#[derive(Debug, Default)]
pub struct ProcFiles {
    pub hostname: String,
    pub version: String,
    pub uptime: String,
    pub cpuinfo: String,
    pub loadavg: String,
    pub meminfo: String,
}

impl ProcFiles {
    /// Read from the live `/proc`. `/proc/uptime` is required; the rest
    /// degrade to empty strings.
    pub fn read() -> Result<Self, AgentError> {
        let optional = |path: &str| std::fs::read_to_string(path).unwrap_or_default();
        let uptime = std::fs::read_to_string("/proc/uptime")
            .map_err(|e| AgentError::Refresh(format!("/proc/uptime: {e}")))?;
        Ok(Self {
            hostname: optional("/proc/sys/kernel/hostname"),
            version: optional("/proc/version"),
            uptime,
            cpuinfo: optional("/proc/cpuinfo"),
            loadavg: optional("/proc/loadavg"),
            meminfo: optional("/proc/meminfo"),
        })
    }
}

impl SystemSnapshot {
    pub fn collect() -> Result<Self, AgentError> {
        Ok(Self::from_proc(&ProcFiles::read()?))
    }

    pub fn from_proc(files: &ProcFiles) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let system_uptime_secs = first_field::<f64>(&files.uptime).unwrap_or(0.0) as u64;

        Self {
            hostname: files.hostname.trim().to_string(),
            kernel: files.version.split(' ').take(3).collect::<Vec<_>>().join(" "),
            system_uptime_secs,
            cpu_model: parse_cpu_model(&files.cpuinfo),
            load_average: files
                .loadavg
                .split_whitespace()
                .take(3)
                .map_while(|s| s.parse().ok())
                .collect(),
            memory: Memory {
                total_kb: meminfo_kb(&files.meminfo, "MemTotal"),
                available_kb: meminfo_kb(&files.meminfo, "MemAvailable"),
            },
        }
    }
}

fn first_field<T: std::str::FromStr>(s: &str) -> Option<T> {
    s.split_whitespace().next()?.parse().ok()
}

/// `key` from `/proc/meminfo` in kB, 0 when absent.
fn meminfo_kb(meminfo: &str, key: &str) -> u64 {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .and_then(first_field)
        .unwrap_or(0)
}

/// Handles both x86 (`model name`) and ARM (`Hardware`) formats.
fn parse_cpu_model(cpuinfo: &str) -> String {
    for line in cpuinfo.lines() {
        if let Some(rest) = line
            .strip_prefix("model name")
            .or_else(|| line.strip_prefix("Hardware"))
        {
            if let Some(value) = rest.split(':').nth(1) {
                return value.trim().to_string();
            }
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_snapshot_from_proc_contents() {
        let files = ProcFiles {
            hostname: "livingroom\n".into(),
            version: "Linux version 6.1.0-18-amd64 (debian-kernel@lists.debian.org)".into(),
            uptime: "12345.67 54321.00\n".into(),
            cpuinfo: "processor\t: 0\nmodel name\t: Intel(R) Core(TM) i5\n".into(),
            loadavg: "0.52 0.58 0.59 1/467 12345\n".into(),
            meminfo: "MemTotal:       16314228 kB\nMemFree:  1 kB\nMemAvailable:   9876543 kB\n"
                .into(),
        };
        let snap = SystemSnapshot::from_proc(&files);
        assert_eq!(snap.hostname, "livingroom");
        assert_eq!(snap.kernel, "Linux version 6.1.0-18-amd64");
        assert_eq!(snap.system_uptime_secs, 12345);
        assert_eq!(snap.cpu_model, "Intel(R) Core(TM) i5");
        assert_eq!(snap.load_average, vec![0.52, 0.58, 0.59]);
        assert_eq!(
            snap.memory,
            Memory {
                total_kb: 16_314_228,
                available_kb: 9_876_543
            }
        );
    }

    #[test]
    fn arm_hardware_line_is_cpu_model() {
        assert_eq!(
            parse_cpu_model("processor : 0\nHardware : BCM2835\n"),
            "BCM2835"
        );
    }

    #[test]
    fn meminfo_keys_match_exactly() {
        let meminfo = "MemTotalish: 5 kB\nMemTotal: 2048 kB\nSwapTotal: 9 kB\n";
        assert_eq!(meminfo_kb(meminfo, "MemTotal"), 2048);
        assert_eq!(meminfo_kb(meminfo, "MemAvailable"), 0);
    }

    #[test]
    fn empty_files_degrade_to_defaults() {
        let snap = SystemSnapshot::from_proc(&ProcFiles::default());
        assert_eq!(snap.system_uptime_secs, 0);
        assert_eq!(snap.cpu_model, "unknown");
        assert!(snap.load_average.is_empty());
        assert_eq!(snap.memory.total_kb, 0);
    }
}
