//! Pre-flight resource checks.
//!
//! Disk space is checked before any expensive work starts. A failed disk
//! reading lets the run proceed; memory is only ever reported.

use std::io;
use std::path::{Path, PathBuf};

use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

use crate::utils::remove_dir_best_effort;

const MB: u64 = 1024 * 1024;

/// Source of free-space and memory readings.
pub trait ResourceProbe: Send {
    fn free_disk_bytes(&mut self, path: &Path) -> io::Result<u64>;

    /// `None` when the platform cannot report it.
    fn available_memory_bytes(&mut self) -> Option<u64>;
}

/// Reads disks and memory through `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            ),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn free_disk_bytes(&mut self, path: &Path) -> io::Result<u64> {
        let disks = Disks::new_with_refreshed_list();
        let resolved = existing_ancestor(path).canonicalize()?;

        // Longest matching mount point wins.
        let mut best: Option<(u64, usize)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if resolved.starts_with(mount) {
                let depth = mount.components().count();
                if best.is_none_or(|(_, d)| depth > d) {
                    best = Some((disk.available_space(), depth));
                }
            }
        }

        best.map(|(available, _)| available).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no disk found for {}", resolved.display()),
            )
        })
    }

    fn available_memory_bytes(&mut self) -> Option<u64> {
        self.system.refresh_memory();
        match self.system.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }
}

/// Outcome of a pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReport {
    pub ok: bool,
    pub reason: Option<String>,
    pub free_disk_mb: Option<u64>,
}

pub struct ResourceGuard {
    probe: Box<dyn ResourceProbe>,
    work_dir: PathBuf,
    min_free_disk_mb: u64,
    low_memory_warn_mb: u64,
    cleanup_on_low_disk: bool,
}

impl ResourceGuard {
    pub fn new(
        probe: Box<dyn ResourceProbe>,
        work_dir: impl Into<PathBuf>,
        min_free_disk_mb: u64,
        low_memory_warn_mb: u64,
        cleanup_on_low_disk: bool,
    ) -> Self {
        Self {
            probe,
            work_dir: work_dir.into(),
            min_free_disk_mb,
            low_memory_warn_mb,
            cleanup_on_low_disk,
        }
    }

    pub fn check(&mut self) -> GuardReport {
        let report = match self.probe.free_disk_bytes(&self.work_dir) {
            Ok(bytes) => {
                let free_mb = bytes / MB;
                info!(free_mb, "Disk free: {} MB", free_mb);
                if has_enough_disk(free_mb, self.min_free_disk_mb) {
                    GuardReport {
                        ok: true,
                        reason: None,
                        free_disk_mb: Some(free_mb),
                    }
                } else {
                    let reason = format!(
                        "Insufficient disk space ({} MB free, {} MB required)",
                        free_mb, self.min_free_disk_mb
                    );
                    warn!("{}; aborting generation", reason);
                    if self.cleanup_on_low_disk {
                        remove_dir_best_effort(&self.work_dir);
                    }
                    return GuardReport {
                        ok: false,
                        reason: Some(reason),
                        free_disk_mb: Some(free_mb),
                    };
                }
            }
            Err(e) => {
                warn!("Could not determine disk usage: {}", e);
                GuardReport {
                    ok: true,
                    reason: None,
                    free_disk_mb: None,
                }
            }
        };

        if let Some(available) = self.probe.available_memory_bytes() {
            let available_mb = available / MB;
            info!(available_mb, "Available memory: {} MB", available_mb);
            if available_mb < self.low_memory_warn_mb {
                warn!(
                    "Low memory: only {} MB available, video assembly may be slow",
                    available_mb
                );
            }
        }

        report
    }
}

/// Exactly the minimum is enough.
pub fn has_enough_disk(free_mb: u64, min_free_mb: u64) -> bool {
    free_mb >= min_free_mb
}

fn existing_ancestor(path: &Path) -> &Path {
    let mut current = path;
    loop {
        if current.as_os_str().is_empty() {
            return Path::new(".");
        }
        if current.exists() {
            return current;
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Path::new("."),
        }
    }
}
