//! Host metrics fed to the threshold check.
//!
//! Emits three samples per collection:
//!
//! | metric | category | unit |
//! |---|---|---|
//! | `CPU Usage` | `System` | percent |
//! | `Memory Usage` | `System` | percent |
//! | `Disk Space Available` | `Storage` | MB free on the configured mount |

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rep_alerts::{MetricSample, MetricSource};
use sysinfo::{Disks, System};
use tracing::{debug, warn};

/// Metric name for CPU utilisation.
pub const CPU_USAGE: &str = "CPU Usage";
/// Metric name for memory utilisation.
pub const MEMORY_USAGE: &str = "Memory Usage";
/// Metric name for free disk space.
pub const DISK_SPACE_AVAILABLE: &str = "Disk Space Available";
/// Category of the CPU and memory metrics.
pub const SYSTEM_CATEGORY: &str = "System";
/// Category of the disk metric.
pub const STORAGE_CATEGORY: &str = "Storage";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples CPU, memory and disk from the local host.
///
/// The `System` handle is kept between collections so CPU usage is measured
/// over the interval since the previous call. The first reading after start
/// may be zero.
#[derive(Debug)]
pub struct SystemMetricSource {
    system: Mutex<System>,
    disk_mount: PathBuf,
}

impl SystemMetricSource {
    /// Creates a source reporting free space on `disk_mount`.
    #[must_use]
    pub fn new(disk_mount: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            disk_mount: disk_mount.into(),
        }
    }

    /// Mount point reported as free disk space.
    #[must_use]
    pub fn disk_mount(&self) -> &Path {
        &self.disk_mount
    }

    fn disk_available_mb(&self) -> Option<f64> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .iter()
            .find(|d| d.mount_point() == self.disk_mount)
            .map(|d| bytes_to_mb(d.available_space()))
    }
}

impl MetricSource for SystemMetricSource {
    fn collect(&self) -> rep_alerts::Result<Vec<MetricSample>> {
        let (cpu, memory) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            (
                f64::from(system.global_cpu_usage()),
                usage_percent(system.used_memory(), system.total_memory()),
            )
        };

        let mut samples = vec![
            MetricSample::new(CPU_USAGE, SYSTEM_CATEGORY, cpu),
            MetricSample::new(MEMORY_USAGE, SYSTEM_CATEGORY, memory),
        ];

        match self.disk_available_mb() {
            Some(mb) => samples.push(MetricSample::new(DISK_SPACE_AVAILABLE, STORAGE_CATEGORY, mb)),
            None => warn!(mount = %self.disk_mount.display(), "disk mount not found"),
        }

        debug!(count = samples.len(), "collected system metrics");
        Ok(samples)
    }
}

/// Percentage of `used` over `total`; zero when `total` is zero.
#[must_use]
pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}

/// Converts bytes to mebibytes.
#[must_use]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}
