//! Host metrics via `sysinfo`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use scout_core::HealthSample;
use sysinfo::{Disks, ProcessesToUpdate, System};

use crate::collaborators::{CollaboratorError, CollaboratorFuture, HostSampler};

/// [`HostSampler`] reading the local machine.
#[derive(Clone)]
pub struct SysinfoSampler {
    system: Arc<Mutex<System>>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler for SysinfoSampler {
    fn sample(&self) -> CollaboratorFuture<'_, Result<HealthSample, CollaboratorError>> {
        let system = self.system.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut system = system.lock().unwrap_or_else(|e| e.into_inner());
                collect(&mut system)
            })
            .await
            .map_err(|e| CollaboratorError::Unavailable(format!("health sampling panicked: {}", e)))?
        })
    }
}

fn collect(system: &mut System) -> Result<HealthSample, CollaboratorError> {
    let pid = sysinfo::get_current_pid().map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;

    // CPU usage is a delta against the previous refresh; the first sample reads 0.
    system.refresh_cpu_usage();
    system.refresh_memory();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    let (process_rss_bytes, thread_count) = system
        .process(pid)
        .map(|process| {
            let threads = process.tasks().map_or(1, |tasks| tasks.len().max(1) as u64);
            (process.memory(), threads)
        })
        .unwrap_or((0, 0));

    let disks = Disks::new_with_refreshed_list();
    let (disk_total, disk_available) = disks
        .list()
        .iter()
        .fold((0u64, 0u64), |(total, available), disk| {
            (total + disk.total_space(), available + disk.available_space())
        });

    Ok(HealthSample {
        cpu_percent: system.global_cpu_usage(),
        memory_percent: percent(system.used_memory(), system.total_memory()),
        disk_percent: percent(disk_total.saturating_sub(disk_available), disk_total),
        process_rss_bytes,
        thread_count,
        connection_count: open_connections(),
        host_uptime_secs: System::uptime(),
        sampled_at: Utc::now(),
    })
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0) as f32
}

/// TCP sockets of this host, from procfs.
#[cfg(target_os = "linux")]
fn open_connections() -> u64 {
    ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|table| table.lines().skip(1).count() as u64)
        .sum()
}

#[cfg(not(target_os = "linux"))]
fn open_connections() -> u64 {
    0
}
