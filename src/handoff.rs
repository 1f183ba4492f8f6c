//! Runs one heavy stage on a dedicated thread with a wall-clock deadline.
//!
//! The orchestrator waits on a single-slot channel. If the deadline passes
//! the worker is abandoned, not cancelled: it keeps running detached and its
//! result is dropped when it eventually finishes.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Written exactly once by the worker.
enum Envelope<T> {
    Ok(T),
    Failed { error: String, trace: String },
}

pub fn run_with_timeout<T, F>(stage: &str, timeout: Duration, stage_fn: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<Envelope<T>>(1);
    let thread_name = format!("{}-worker", stage.to_lowercase().replace(' ', "-"));

    let worker = thread::Builder::new().name(thread_name).spawn(move || {
        let envelope = match panic::catch_unwind(AssertUnwindSafe(stage_fn)) {
            Ok(Ok(value)) => Envelope::Ok(value),
            Ok(Err(e)) => Envelope::Failed {
                error: e.to_string(),
                trace: format!("{e:?}\n{}", Backtrace::force_capture()),
            },
            Err(payload) => Envelope::Failed {
                error: format!("panicked: {}", panic_message(payload.as_ref())),
                trace: Backtrace::force_capture().to_string(),
            },
        };
        // The receiver is gone if the orchestrator already timed out.
        let _ = tx.send(envelope);
    })?;

    info!(stage, timeout_secs = timeout.as_secs(), "Started {} in worker thread", stage);
    let started = Instant::now();

    match rx.recv_timeout(timeout) {
        Ok(Envelope::Ok(value)) => {
            debug!(stage, elapsed_ms = started.elapsed().as_millis() as u64, "Worker finished");
            // Already past its final send; joining is immediate.
            let _ = worker.join();
            Ok(value)
        }
        Ok(Envelope::Failed { error, trace }) => {
            error!(stage, "{} failed: {}", stage, error);
            debug!("{}", trace);
            let _ = worker.join();
            Err(Error::Worker {
                stage: stage.to_string(),
                message: error,
                trace,
            })
        }
        Err(RecvTimeoutError::Timeout) => {
            error!(
                stage,
                timeout_secs = timeout.as_secs(),
                "{} exceeded timeout of {}s; abandoning worker",
                stage,
                timeout.as_secs()
            );
            drop(worker);
            Err(Error::StageTimeout {
                stage: stage.to_string(),
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            error!(stage, "{} worker finished without returning a result", stage);
            let _ = worker.join();
            Err(Error::Worker {
                stage: stage.to_string(),
                message: "worker finished without returning a result".to_string(),
                trace: String::new(),
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
