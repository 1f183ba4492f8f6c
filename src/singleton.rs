//! Cross-process owner election over a shared volume.
//!
//! The lock file records the owner's pid and claim time. A process that finds
//! a live owner becomes a follower and only serves liveness requests.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owner,
    Follower { pid: u32 },
}

#[derive(Debug)]
pub struct SingletonLock {
    path: PathBuf,
    ownership: Ownership,
}

impl SingletonLock {
    /// Claims the lock, checking recorded owners against the live process table.
    pub fn claim(path: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        Self::claim_with(path, |pid| {
            let pid = Pid::from_u32(pid);
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            system.process(pid).is_some()
        })
    }

    pub fn claim_with<F>(path: impl Into<PathBuf>, mut is_alive: F) -> Self
    where
        F: FnMut(u32) -> bool,
    {
        let path = path.into();
        let own_pid = std::process::id();

        let ownership = match try_claim(&path, own_pid, &mut is_alive) {
            Ok(ownership) => ownership,
            Err(e) => {
                warn!(
                    "Could not acquire singleton lock ({}): {}. Proceeding as owner.",
                    path.display(),
                    e
                );
                Ownership::Owner
            }
        };

        match ownership {
            Ownership::Owner => info!(pid = own_pid, "Holding singleton lock {}", path.display()),
            Ownership::Follower { pid } => info!(
                owner = pid,
                "Singleton lock owned by PID {}; skipping scheduler and verification in this process", pid
            ),
        }

        Self { path, ownership }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owner(&self) -> bool {
        self.ownership == Ownership::Owner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file if it still names this process.
    pub fn release(self) -> bool {
        if !self.is_owner() {
            return false;
        }
        match read_owner(&self.path) {
            Ok(Some(pid)) if pid == std::process::id() => match fs::remove_file(&self.path) {
                Ok(()) => {
                    info!("Released singleton lock {}", self.path.display());
                    true
                }
                Err(e) => {
                    warn!("Could not release singleton lock {}: {}", self.path.display(), e);
                    false
                }
            },
            _ => false,
        }
    }
}

fn try_claim<F>(path: &Path, own_pid: u32, is_alive: &mut F) -> io::Result<Ownership>
where
    F: FnMut(u32) -> bool,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(lock_body(own_pid).as_bytes())?;
            return Ok(Ownership::Owner);
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    match read_owner(path)? {
        Some(pid) if pid == own_pid => Ok(Ownership::Owner),
        Some(pid) if is_alive(pid) => Ok(Ownership::Follower { pid }),
        Some(pid) => {
            info!(stale_pid = pid, "Stale singleton lock found; taking lock for this process");
            fs::write(path, lock_body(own_pid))?;
            Ok(Ownership::Owner)
        }
        None => {
            warn!("Unreadable singleton lock {}; taking it over", path.display());
            fs::write(path, lock_body(own_pid))?;
            Ok(Ownership::Owner)
        }
    }
}

fn read_owner(path: &Path) -> io::Result<Option<u32>> {
    let body = fs::read_to_string(path)?;
    Ok(body.lines().next().and_then(|line| line.trim().parse().ok()))
}

fn lock_body(pid: u32) -> String {
    format!("{}\n{}\n", pid, Utc::now().to_rfc3339())
}
