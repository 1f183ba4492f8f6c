//! Recurring trigger for pipeline runs.
//!
//! One named driver thread sleeps until the next firing, runs the job inline,
//! then computes the following firing from the one it just served. Firings
//! noticed later than the misfire grace window are skipped.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ScheduleMode;
use crate::error::{Error, Result};
use crate::pipeline::{RunResult, RunStatus};

pub const JOB_ID: &str = "shorts_generator";

#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Daily {
        hour: u32,
        timezone: Tz,
        schedule: cron::Schedule,
    },
}

impl Trigger {
    pub fn from_mode(mode: &ScheduleMode) -> Result<Self> {
        match mode {
            ScheduleMode::Interval { hours } => Ok(Trigger::Interval(Duration::from_secs(u64::from(*hours) * 3600))),
            ScheduleMode::Daily { hour, timezone } => Self::daily(*hour, *timezone),
        }
    }

    pub fn daily(hour: u32, timezone: Tz) -> Result<Self> {
        let expression = format!("0 0 {hour} * * *");
        let schedule = cron::Schedule::from_str(&expression)
            .map_err(|e| Error::config(format!("invalid daily schedule '{expression}': {e}")))?;
        Ok(Trigger::Daily {
            hour,
            timezone,
            schedule,
        })
    }

    pub fn job_name(&self) -> String {
        match self {
            Trigger::Interval(_) => "Generate and upload YouTube Shorts (interval)".to_string(),
            Trigger::Daily { .. } => "Generate and upload YouTube Shorts (daily cron)".to_string(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Interval(every) => format!("every {} hours", every.as_secs() / 3600),
            Trigger::Daily { hour, timezone, .. } => format!("daily at {hour:02}:00 ({timezone})"),
        }
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval(every) => {
                let step = ChronoDuration::from_std(*every).ok()?;
                after.checked_add_signed(step)
            }
            Trigger::Daily {
                timezone, schedule, ..
            } => schedule
                .after(&after.with_timezone(timezone))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// A firing is skipped when noticed more than `grace` after it was due.
pub fn is_misfire(scheduled: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    match ChronoDuration::from_std(grace) {
        Ok(grace) => now - scheduled > grace,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub next_run_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    #[serde(rename = "scheduler_running")]
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

pub type SharedStatus = Arc<RwLock<SchedulerStatus>>;

pub struct Scheduler {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    status: SharedStatus,
}

impl Scheduler {
    /// Arms `trigger` and starts the driver thread. `job` runs on that thread.
    pub fn start<J>(trigger: Trigger, misfire_grace: Duration, status: SharedStatus, mut job: J) -> Result<Self>
    where
        J: FnMut() -> RunResult + Send + 'static,
    {
        let first = trigger.next_after(Utc::now());
        let name = trigger.job_name();
        {
            let mut s = status.write();
            s.running = true;
            s.jobs = vec![JobStatus {
                id: JOB_ID.to_string(),
                name: name.clone(),
                next_run_time: first,
            }];
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let shared = status.clone();
        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                let mut next_run = first;
                loop {
                    let Some(scheduled) = next_run else {
                        warn!("Trigger has no future firings; waiting for shutdown");
                        let _ = stop_rx.recv();
                        break;
                    };

                    let now = Utc::now();
                    if scheduled > now {
                        let wait = (scheduled - now).to_std().unwrap_or(Duration::ZERO);
                        match stop_rx.recv_timeout(wait) {
                            Err(RecvTimeoutError::Timeout) => continue,
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }

                    if is_misfire(scheduled, now, misfire_grace) {
                        warn!(
                            scheduled = %scheduled,
                            "Run time of job \"{}\" was missed by {}s; skipping",
                            name,
                            (now - scheduled).num_seconds()
                        );
                    } else {
                        info!(job = JOB_ID, "Running scheduled job \"{}\"", name);
                        let result = job();
                        match result.status {
                            RunStatus::Success => info!(
                                video_id = result.video_id.as_deref().unwrap_or_default(),
                                "Scheduled run succeeded"
                            ),
                            RunStatus::Skipped => info!(
                                "Scheduled run skipped: {}",
                                result.error.as_deref().unwrap_or("no reason")
                            ),
                            RunStatus::Failed | RunStatus::Error => error!(
                                "Scheduled run ended with {:?}: {}",
                                result.status,
                                result.error.as_deref().unwrap_or("unknown error")
                            ),
                        }
                    }

                    next_run = trigger.next_after(scheduled);
                    if let Some(job_status) = shared.write().jobs.first_mut() {
                        job_status.next_run_time = next_run;
                    }
                    if let Some(next) = next_run {
                        info!("Next run at {}", next.to_rfc3339());
                    }

                    match stop_rx.try_recv() {
                        Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
                        Err(mpsc::TryRecvError::Empty) => {}
                    }
                }
                let mut s = shared.write();
                s.running = false;
                s.jobs.clear();
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            status,
        })
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    /// Signals the driver and waits for it, including any in-flight run.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        info!("Stopping scheduler...");
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if handle.join().is_err() {
            error!("Scheduler thread panicked");
            let mut s = self.status.write();
            s.running = false;
            s.jobs.clear();
        }
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
