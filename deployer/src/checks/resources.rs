//! Disk and memory usage, from sysinfo locally or from `df`/`free` output
//! collected on a remote host

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Disk and memory usage of a host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Root filesystem usage percentage
    pub disk_percent: f32,

    /// Memory usage percentage, page cache excluded
    pub memory_percent: f32,
}

fn percent(used: u64, total: u64) -> f32 {
    if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    }
}

/// Usage of the machine this process runs on
pub fn collect_local() -> ResourceUsage {
    let mut sys = System::new();
    sys.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"));
    let (disk_used, disk_total) = match root {
        Some(disk) => (
            disk.total_space().saturating_sub(disk.available_space()),
            disk.total_space(),
        ),
        None => disks.iter().fold((0u64, 0u64), |(used, total), disk| {
            (
                used + disk.total_space().saturating_sub(disk.available_space()),
                total + disk.total_space(),
            )
        }),
    };

    let memory_total = sys.total_memory();
    let memory_used = memory_total.saturating_sub(sys.available_memory());

    ResourceUsage {
        disk_percent: percent(disk_used, disk_total),
        memory_percent: percent(memory_used, memory_total),
    }
}

/// Command printing root filesystem usage then memory usage
pub const REMOTE_USAGE_COMMAND: &str = "df -P / && free -b";

/// Parse `df -P /` followed by `free -b`
pub fn parse_remote(output: &str) -> Option<ResourceUsage> {
    let disk_percent = output
        .lines()
        .filter(|l| l.trim_end().ends_with(" /"))
        .find_map(|l| {
            l.split_whitespace()
                .find(|col| col.ends_with('%'))
                .and_then(|col| col.trim_end_matches('%').parse::<f32>().ok())
        })?;

    // Mem: total used free shared buff/cache available
    let mem: Vec<u64> = output
        .lines()
        .find(|l| l.starts_with("Mem:"))?
        .split_whitespace()
        .skip(1)
        .filter_map(|c| c.parse().ok())
        .collect();
    let total = *mem.first()?;
    let used = match mem.get(5) {
        Some(available) => total.saturating_sub(*available),
        None => *mem.get(1)?,
    };

    Some(ResourceUsage {
        disk_percent,
        memory_percent: percent(used, total),
    })
}
