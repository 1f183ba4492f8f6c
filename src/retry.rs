//! Fixed-backoff retries for the publish stage.

use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Calls `publish` up to `max_attempts` times, sleeping `backoff` between
/// attempts. An empty id counts as a failed attempt. The last error is
/// returned once attempts run out.
pub fn publish_with_retries<F>(mut publish: F, max_attempts: u32, backoff: Duration) -> Result<String>
where
    F: FnMut() -> Result<String>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        info!(attempt, max_attempts, "Upload attempt {}/{}", attempt, max_attempts);
        let outcome = publish().and_then(|id| {
            if id.trim().is_empty() {
                Err(Error::EmptyVideoId)
            } else {
                Ok(id)
            }
        });
        match outcome {
            Ok(id) => return Ok(id),
            Err(e) => {
                warn!(attempt, "Upload attempt {} failed: {}", attempt, e);
                last_err = Some(e);
                if attempt < max_attempts {
                    info!("Retrying in {} seconds", backoff.as_secs());
                    thread::sleep(backoff);
                }
            }
        }
    }

    let err = last_err.unwrap_or(Error::EmptyVideoId);
    error!("All upload attempts failed. Last error: {}", err);
    Err(err)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn exhausts_attempts_and_returns_last_error() {
        let calls = Cell::new(0);
        let err = publish_with_retries(
            || {
                calls.set(calls.get() + 1);
                Err(Error::Publish(format!("attempt {}", calls.get())))
            },
            3,
            Duration::ZERO,
        )
        .unwrap_err();
        assert_eq!(calls.get(), 3);
        assert_eq!(err.to_string(), "Upload failed: attempt 3");
    }

    #[test]
    fn succeeds_on_second_attempt() {
        let calls = Cell::new(0);
        let id = publish_with_retries(
            || {
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    Err(Error::Publish("connection reset".to_string()))
                } else {
                    Ok("abc123XYZ9_".to_string())
                }
            },
            3,
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(id, "abc123XYZ9_");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn empty_id_is_retried() {
        let calls = Cell::new(0);
        let err = publish_with_retries(
            || {
                calls.set(calls.get() + 1);
                Ok(String::new())
            },
            2,
            Duration::ZERO,
        )
        .unwrap_err();
        assert_eq!(calls.get(), 2);
        assert!(matches!(err, Error::EmptyVideoId));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let calls = Cell::new(0);
        let id = publish_with_retries(
            || {
                calls.set(calls.get() + 1);
                Ok("id".to_string())
            },
            0,
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(id, "id");
        assert_eq!(calls.get(), 1);
    }
}
