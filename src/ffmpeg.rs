use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};

pub const FFMPEG: &str = "ffmpeg";

/// Runs ffmpeg to completion, surfacing the tail of stderr on failure.
pub fn run<S: AsRef<str>>(args: &[S], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new(FFMPEG);
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!(args = ?args.iter().map(|a| a.as_ref()).collect::<Vec<_>>(), "ffmpeg");

    let output = cmd
        .output()
        .map_err(|e| Error::command(FFMPEG, format!("failed to spawn: {e}")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    Err(Error::command(
        FFMPEG,
        format!(
            "exited with {}: {}",
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
        ),
    ))
}

/// Escapes a path used as a filter option value.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}
