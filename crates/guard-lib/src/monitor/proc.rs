//! Host readings from the Linux proc filesystem
//!
//! - /proc/stat for CPU busy fraction (delta between reads)
//! - /proc/meminfo for memory in use (MemTotal - MemAvailable)
//!
//! Traffic fields are left at zero; the monitor fills them from its recorder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::{MetricsReading, MetricsSource};

/// Cumulative jiffies from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    pub idle: u64,
}

/// Metrics source backed by /proc
pub struct ProcMetricsSource {
    proc_path: PathBuf,
    previous: Mutex<Option<CpuTimes>>,
}

impl ProcMetricsSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create with a custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            previous: Mutex::new(None),
        }
    }

    /// Parse the aggregate `cpu` line of /proc/stat
    pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
        let line = content
            .lines()
            .find(|l| l.split_whitespace().next() == Some("cpu"))
            .context("No aggregate cpu line in /proc/stat")?;

        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .context("Failed to parse /proc/stat cpu fields")?;
        if fields.len() < 4 {
            anyhow::bail!("Too few cpu fields in /proc/stat: {}", fields.len());
        }

        // guest and guest_nice are already counted in user and nice
        let total: u64 = fields.iter().take(8).sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        Ok(CpuTimes { total, idle })
    }

    /// Parse /proc/meminfo into kB values keyed by field name
    pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
        let mut fields = HashMap::new();

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                if let Ok(value) = value.parse::<u64>() {
                    fields.insert(name.trim_end_matches(':').to_string(), value);
                }
            }
        }

        fields
    }

    /// Busy fraction between two readings, or since boot without a previous one
    pub fn cpu_fraction(previous: Option<CpuTimes>, current: CpuTimes) -> f64 {
        let (total, idle) = match previous {
            Some(prev) if current.total > prev.total => (
                current.total - prev.total,
                current.idle.saturating_sub(prev.idle),
            ),
            _ => (current.total, current.idle),
        };
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(idle) as f64 / total as f64).clamp(0.0, 1.0)
    }

    fn read_cpu(&self) -> Result<f64> {
        let path = self.proc_path.join("stat");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let current = Self::parse_cpu_times(&content)?;

        let mut previous = self.previous.lock().unwrap_or_else(|p| p.into_inner());
        let fraction = Self::cpu_fraction(*previous, current);
        *previous = Some(current);
        Ok(fraction)
    }

    fn read_memory(&self) -> Result<f64> {
        let path = self.proc_path.join("meminfo");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let fields = Self::parse_meminfo(&content);

        let total = *fields.get("MemTotal").context("MemTotal missing from meminfo")?;
        if total == 0 {
            anyhow::bail!("MemTotal is zero");
        }
        let available = fields
            .get("MemAvailable")
            .or_else(|| fields.get("MemFree"))
            .copied()
            .unwrap_or(0);

        Ok((total.saturating_sub(available) as f64 / total as f64).clamp(0.0, 1.0))
    }
}

impl MetricsSource for ProcMetricsSource {
    fn read(&self) -> Result<MetricsReading> {
        let cpu = self.read_cpu()?;
        let memory = self.read_memory()?;

        Ok(MetricsReading {
            cpu,
            memory,
            ..Default::default()
        })
    }
}

impl Default for ProcMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}
