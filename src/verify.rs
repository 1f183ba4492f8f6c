//! Startup verification gated by marker files.
//!
//! Three markers live in the persistent marker directory:
//!
//! * `complete`: a pass succeeded in run-once mode; later boots skip.
//! * `in-progress`: some process is verifying right now; others skip. Created
//!   with `create_new` so two booting processes cannot both claim it.
//! * `failed`: the last pass failed; boots skip until the cooldown elapses.
//!
//! Each marker holds an RFC 3339 timestamp on the first line and an optional
//! reason on the second. Marker I/O is best-effort and never aborts startup.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::VerificationConfig;
use crate::error::{Error, Result};
use crate::stages::{Publisher, SpeechSynthesizer, ThumbnailRenderer};

const VERIFICATION_TITLE: &str = "Verification Test - System Online";
const VERIFICATION_SAMPLE: &str = "System check. Narration is working.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Complete,
    InProgress,
    Failed,
}

impl Marker {
    pub fn file_name(self) -> &'static str {
        match self {
            Marker::Complete => ".startup_verification_complete",
            Marker::InProgress => ".startup_verification_in_progress",
            Marker::Failed => ".startup_verification_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

/// Holds the `in-progress` marker; removes it when dropped.
#[must_use]
pub struct InProgressClaim {
    path: PathBuf,
}

impl Drop for InProgressClaim {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, marker: Marker) -> PathBuf {
        self.dir.join(marker.file_name())
    }

    pub fn exists(&self, marker: Marker) -> bool {
        self.path(marker).exists()
    }

    pub fn write(&self, marker: Marker, at: DateTime<Utc>, reason: Option<&str>) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(marker), marker_body(at, reason))
    }

    /// Atomically creates the `in-progress` marker. `Ok(None)` means another
    /// process already holds it.
    pub fn claim_in_progress(&self, at: DateTime<Utc>) -> io::Result<Option<InProgressClaim>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(Marker::InProgress);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        };
        let claim = InProgressClaim { path };
        file.write_all(marker_body(at, Some(&format!("pid {}", std::process::id()))).as_bytes())?;
        Ok(Some(claim))
    }

    /// Timestamp recorded in the marker, falling back to its mtime.
    pub fn timestamp(&self, marker: Marker) -> Option<DateTime<Utc>> {
        let path = self.path(marker);
        let recorded = fs::read_to_string(&path).ok().and_then(|body| {
            let first = body.lines().next()?.trim().to_string();
            DateTime::parse_from_rfc3339(&first).ok()
        });
        match recorded {
            Some(ts) => Some(ts.with_timezone(&Utc)),
            None => fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from),
        }
    }

    /// Reason line of the marker, if any.
    pub fn reason(&self, marker: Marker) -> Option<String> {
        let body = fs::read_to_string(self.path(marker)).ok()?;
        body.lines()
            .nth(1)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
    }

    pub fn remove(&self, marker: Marker) -> bool {
        match fs::remove_file(self.path(marker)) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Could not remove {}: {}", self.path(marker).display(), e);
                false
            }
        }
    }
}

fn marker_body(at: DateTime<Utc>, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{}\n{}\n", at.to_rfc3339(), reason.replace('\n', " ")),
        None => format!("{}\n", at.to_rfc3339()),
    }
}

/// Why verification may or may not start right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Gate {
    Disabled,
    AlreadyVerified,
    InProgress,
    CoolingDown { until: DateTime<Utc> },
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Skipped(Gate),
    Verified,
    Failed(String),
    /// Quota exhaustion; not remembered as a failure.
    RateLimited(String),
}

/// Collaborators exercised by a verification pass.
#[derive(Clone)]
pub struct VerificationChecks {
    pub publisher: Arc<dyn Publisher>,
    pub thumbnails: Arc<dyn ThumbnailRenderer>,
    pub speech: Arc<dyn SpeechSynthesizer>,
}

struct CheckResults {
    credentials: Result<()>,
    visual: Result<()>,
    speech: Result<()>,
}

impl CheckResults {
    /// A rate limit among the errors that sank a failed pass.
    fn blocking_rate_limit(&self) -> Option<&Error> {
        if self.passed() {
            return None;
        }
        let causes = match &self.credentials {
            Err(e) => vec![e],
            Ok(()) => [&self.visual, &self.speech]
                .into_iter()
                .filter_map(|r| r.as_ref().err())
                .collect(),
        };
        causes.into_iter().find(|e| e.is_rate_limited())
    }

    fn passed(&self) -> bool {
        self.credentials.is_ok() && (self.visual.is_ok() || self.speech.is_ok())
    }

    fn failure_reason(&self) -> String {
        let mut reasons = Vec::new();
        for (name, result) in [
            ("credentials", &self.credentials),
            ("thumbnail", &self.visual),
            ("speech", &self.speech),
        ] {
            if let Err(e) = result {
                reasons.push(format!("{name}: {e}"));
            }
        }
        reasons.join("; ")
    }
}

pub struct StartupVerifier {
    settings: VerificationConfig,
    markers: MarkerStore,
    checks: VerificationChecks,
}

impl StartupVerifier {
    pub fn new(settings: VerificationConfig, checks: VerificationChecks) -> Self {
        let markers = MarkerStore::new(&settings.marker_dir);
        Self {
            settings,
            markers,
            checks,
        }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    /// Evaluates the entry guards. Removes an `in-progress` marker left
    /// behind by a crashed process once it is older than the stale window.
    pub fn gate(&self, now: DateTime<Utc>) -> Gate {
        if !self.settings.enabled {
            return Gate::Disabled;
        }
        if self.markers.exists(Marker::Complete) {
            return Gate::AlreadyVerified;
        }
        if self.markers.exists(Marker::InProgress) {
            let stale = self
                .markers
                .timestamp(Marker::InProgress)
                .is_some_and(|started| now - started > to_chrono(self.settings.stale_in_progress));
            if !stale {
                return Gate::InProgress;
            }
            warn!(
                "Removing stale in-progress marker {}",
                self.markers.path(Marker::InProgress).display()
            );
            self.markers.remove(Marker::InProgress);
        }
        if self.markers.exists(Marker::Failed) {
            if let Some(failed_at) = self.markers.timestamp(Marker::Failed) {
                let until = failed_at
                    .checked_add_signed(to_chrono(self.settings.failure_cooldown))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                if now < until {
                    return Gate::CoolingDown { until };
                }
            }
        }
        Gate::Ready
    }

    pub fn should_run_startup_verification(&self, now: DateTime<Utc>) -> bool {
        self.gate(now) == Gate::Ready
    }

    pub fn run_if_enabled(&self, now: DateTime<Utc>) -> VerificationOutcome {
        match self.gate(now) {
            Gate::Ready => {
                info!("Startup verification enabled (STARTUP_VERIFICATION=true)");
                self.run_pass(now)
            }
            gate => {
                log_skip(&gate, &self.markers);
                VerificationOutcome::Skipped(gate)
            }
        }
    }

    /// Runs a pass ignoring cooldown and completion markers. Still refuses to
    /// run next to another process's live pass.
    pub fn run_forced(&self, now: DateTime<Utc>) -> VerificationOutcome {
        self.run_pass(now)
    }

    fn run_pass(&self, now: DateTime<Utc>) -> VerificationOutcome {
        let _claim = match self.markers.claim_in_progress(now) {
            Ok(Some(claim)) => Some(claim),
            Ok(None) => {
                info!("Another process is already verifying; skipping");
                return VerificationOutcome::Skipped(Gate::InProgress);
            }
            Err(e) => {
                warn!("Could not write in-progress marker, verifying anyway: {}", e);
                None
            }
        };

        info!("{}", "=".repeat(80));
        info!("STARTUP VERIFICATION: checking credentials, thumbnail and speech");
        info!("{}", "=".repeat(80));

        let results = match panic::catch_unwind(AssertUnwindSafe(|| self.execute_checks())) {
            Ok(results) => results,
            Err(_) => {
                let reason = "verification checks panicked".to_string();
                error!("{}", reason);
                self.record_failure(now, &reason);
                return VerificationOutcome::Failed(reason);
            }
        };

        if let Some(limit) = results.blocking_rate_limit() {
            warn!("Startup verification hit a rate limit, skipping for this boot: {}", limit);
            return VerificationOutcome::RateLimited(limit.to_string());
        }

        if results.passed() {
            info!("STARTUP VERIFICATION PASSED");
            if let Err(e) = &results.visual {
                warn!("Thumbnail check failed but speech works: {}", e);
            }
            if let Err(e) = &results.speech {
                warn!("Speech check failed but thumbnail works: {}", e);
            }
            self.markers.remove(Marker::Failed);
            if self.settings.run_once {
                match self.markers.write(Marker::Complete, now, None) {
                    Ok(()) => info!(
                        "Saved completion flag to {}",
                        self.markers.path(Marker::Complete).display()
                    ),
                    Err(e) => warn!("Could not write completion flag (will re-run on next boot): {}", e),
                }
            }
            VerificationOutcome::Verified
        } else {
            let reason = results.failure_reason();
            error!("STARTUP VERIFICATION FAILED: {}", reason);
            self.record_failure(now, &reason);
            VerificationOutcome::Failed(reason)
        }
    }

    fn record_failure(&self, now: DateTime<Utc>, reason: &str) {
        self.markers.remove(Marker::Complete);
        if let Err(e) = self.markers.write(Marker::Failed, now, Some(reason)) {
            warn!("Could not write failure marker: {}", e);
        }
    }

    fn execute_checks(&self) -> CheckResults {
        let credentials = self.checks.publisher.verify_credentials();
        match &credentials {
            Ok(()) => info!("Publisher credentials OK"),
            Err(e) => warn!("Publisher credential check failed: {}", e),
        }

        let scratch = match tempfile::Builder::new().prefix("startup-verify").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                let message = e.to_string();
                return CheckResults {
                    credentials,
                    visual: Err(Error::Io(e)),
                    speech: Err(Error::Synthesis(message)),
                };
            }
        };

        let visual = self
            .checks
            .thumbnails
            .render(VERIFICATION_TITLE, scratch.path())
            .and_then(|path| require_file(&path));
        match &visual {
            Ok(()) => info!("Thumbnail check OK"),
            Err(e) => warn!("Thumbnail check failed: {}", e),
        }

        let speech = self
            .checks
            .speech
            .synthesize(VERIFICATION_SAMPLE, &scratch.path().join("verification.wav"))
            .and_then(|path| require_file(&path));
        match &speech {
            Ok(()) => info!(synthesizer = self.checks.speech.name(), "Speech check OK"),
            Err(e) => warn!("Speech check failed: {}", e),
        }

        CheckResults {
            credentials,
            visual,
            speech,
        }
    }
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} was not produced", path.display()),
        )))
    }
}

fn log_skip(gate: &Gate, markers: &MarkerStore) {
    match gate {
        Gate::Disabled => info!("Startup verification disabled (set STARTUP_VERIFICATION=true to enable)"),
        Gate::AlreadyVerified => info!("Startup verification already completed on a previous boot"),
        Gate::InProgress => info!("Startup verification already running in another process"),
        Gate::CoolingDown { until } => info!(
            "Last startup verification failed ({}); retrying after {}",
            markers.reason(Marker::Failed).unwrap_or_else(|| "no reason recorded".to_string()),
            until.to_rfc3339()
        ),
        Gate::Ready => {}
    }
}

fn to_chrono(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::stages::VideoMetadata;

    #[derive(Default)]
    struct Calls(AtomicUsize);

    impl Calls {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        RateLimit,
    }

    struct FakePublisher {
        behavior: Behavior,
        calls: Arc<Calls>,
    }

    impl Publisher for FakePublisher {
        fn upload(&self, _video: &Path, _metadata: &VideoMetadata, _thumbnail: Option<&Path>) -> Result<String> {
            unreachable!("verification never uploads")
        }

        fn verify_credentials(&self) -> Result<()> {
            self.calls.bump();
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => Err(Error::Publish("invalid_grant".to_string())),
                Behavior::RateLimit => Err(Error::rate_limited("youtube", "quotaExceeded")),
            }
        }
    }

    struct FakeThumbnails {
        behavior: Behavior,
        calls: Arc<Calls>,
    }

    impl ThumbnailRenderer for FakeThumbnails {
        fn render(&self, _title: &str, output_dir: &Path) -> Result<PathBuf> {
            self.calls.bump();
            match self.behavior {
                Behavior::Ok => {
                    let path = output_dir.join("thumb.png");
                    fs::write(&path, b"png")?;
                    Ok(path)
                }
                Behavior::Fail => Err(Error::Thumbnail("ffmpeg missing".to_string())),
                Behavior::RateLimit => Err(Error::rate_limited("images", "slow down")),
            }
        }
    }

    struct FakeSpeech {
        behavior: Behavior,
        calls: Arc<Calls>,
    }

    impl SpeechSynthesizer for FakeSpeech {
        fn name(&self) -> &str {
            "fake"
        }

        fn synthesize(&self, _text: &str, output: &Path) -> Result<PathBuf> {
            self.calls.bump();
            match self.behavior {
                Behavior::Ok => {
                    fs::write(output, b"RIFF")?;
                    Ok(output.to_path_buf())
                }
                Behavior::Fail => Err(Error::Synthesis("no voice model".to_string())),
                Behavior::RateLimit => Err(Error::rate_limited("tts", "quota")),
            }
        }
    }

    struct Setup {
        _dir: TempDir,
        verifier: StartupVerifier,
        calls: Arc<Calls>,
    }

    fn setup(enabled: bool, run_once: bool, behaviors: [Behavior; 3]) -> Setup {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Calls::default());
        let settings = VerificationConfig {
            enabled,
            run_once,
            failure_cooldown: Duration::from_secs(6 * 3600),
            stale_in_progress: Duration::from_secs(2 * 3600),
            marker_dir: dir.path().to_path_buf(),
            singleton_lock_path: dir.path().join(".app_singleton"),
        };
        let checks = VerificationChecks {
            publisher: Arc::new(FakePublisher {
                behavior: behaviors[0],
                calls: calls.clone(),
            }),
            thumbnails: Arc::new(FakeThumbnails {
                behavior: behaviors[1],
                calls: calls.clone(),
            }),
            speech: Arc::new(FakeSpeech {
                behavior: behaviors[2],
                calls: calls.clone(),
            }),
        };
        Setup {
            _dir: dir,
            verifier: StartupVerifier::new(settings, checks),
            calls,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    const ALL_OK: [Behavior; 3] = [Behavior::Ok, Behavior::Ok, Behavior::Ok];

    #[test]
    fn disabled_never_runs() {
        let s = setup(false, true, ALL_OK);
        assert_eq!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Skipped(Gate::Disabled));
        assert_eq!(s.calls.get(), 0);
    }

    #[test]
    fn run_once_is_idempotent() {
        let s = setup(true, true, ALL_OK);
        assert_eq!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Verified);
        assert!(s.verifier.markers().exists(Marker::Complete));
        assert!(!s.verifier.markers().exists(Marker::InProgress));
        let after_first = s.calls.get();
        assert_eq!(after_first, 3);

        assert!(!s.verifier.should_run_startup_verification(t0()));
        assert_eq!(
            s.verifier.run_if_enabled(t0()),
            VerificationOutcome::Skipped(Gate::AlreadyVerified)
        );
        assert_eq!(s.calls.get(), after_first);
    }

    #[test]
    fn without_run_once_every_boot_verifies() {
        let s = setup(true, false, ALL_OK);
        assert_eq!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Verified);
        assert!(!s.verifier.markers().exists(Marker::Complete));
        assert!(s.verifier.should_run_startup_verification(t0()));
    }

    #[test]
    fn failed_marker_respects_cooldown() {
        let s = setup(true, true, ALL_OK);
        s.verifier
            .markers()
            .write(Marker::Failed, t0(), Some("upload rejected"))
            .unwrap();

        assert!(!s.verifier.should_run_startup_verification(t0() + ChronoDuration::hours(1)));
        assert_eq!(
            s.verifier.gate(t0() + ChronoDuration::hours(1)),
            Gate::CoolingDown {
                until: t0() + ChronoDuration::hours(6)
            }
        );
        assert!(s.verifier.should_run_startup_verification(t0() + ChronoDuration::hours(7)));
        assert_eq!(s.verifier.markers().reason(Marker::Failed).as_deref(), Some("upload rejected"));
    }

    #[test]
    fn success_clears_failed_marker() {
        let s = setup(true, true, ALL_OK);
        s.verifier.markers().write(Marker::Failed, t0(), Some("old")).unwrap();
        let later = t0() + ChronoDuration::hours(7);
        assert_eq!(s.verifier.run_if_enabled(later), VerificationOutcome::Verified);
        assert!(!s.verifier.markers().exists(Marker::Failed));
        assert!(s.verifier.markers().exists(Marker::Complete));
    }

    #[test]
    fn failure_writes_marker_with_reason() {
        let s = setup(true, true, [Behavior::Fail, Behavior::Ok, Behavior::Ok]);
        let outcome = s.verifier.run_if_enabled(t0());
        let VerificationOutcome::Failed(reason) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(reason.contains("invalid_grant"));
        assert!(s.verifier.markers().exists(Marker::Failed));
        assert!(!s.verifier.markers().exists(Marker::Complete));
        assert!(!s.verifier.markers().exists(Marker::InProgress));
        assert_eq!(s.verifier.markers().timestamp(Marker::Failed), Some(t0()));
    }

    #[test]
    fn one_generation_check_is_enough() {
        let s = setup(true, false, [Behavior::Ok, Behavior::Fail, Behavior::Ok]);
        assert_eq!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Verified);

        let s = setup(true, false, [Behavior::Ok, Behavior::Ok, Behavior::Fail]);
        assert_eq!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Verified);

        let s = setup(true, false, [Behavior::Ok, Behavior::Fail, Behavior::Fail]);
        assert!(matches!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Failed(_)));
    }

    #[test]
    fn rate_limit_leaves_no_failure_marker() {
        let s = setup(true, true, [Behavior::RateLimit, Behavior::Ok, Behavior::Ok]);
        let outcome = s.verifier.run_if_enabled(t0());
        assert!(matches!(outcome, VerificationOutcome::RateLimited(_)));
        assert!(!s.verifier.markers().exists(Marker::Failed));
        assert!(!s.verifier.markers().exists(Marker::Complete));
        assert!(!s.verifier.markers().exists(Marker::InProgress));
        assert!(s.verifier.should_run_startup_verification(t0()));
    }

    #[test]
    fn rate_limit_on_spare_check_still_verifies() {
        let s = setup(true, true, [Behavior::Ok, Behavior::RateLimit, Behavior::Ok]);
        assert_eq!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Verified);
        assert!(s.verifier.markers().exists(Marker::Complete));
        assert!(!s.verifier.markers().exists(Marker::Failed));
    }

    #[test]
    fn rate_limited_generation_checks_leave_no_marker() {
        let s = setup(true, true, [Behavior::Ok, Behavior::RateLimit, Behavior::Fail]);
        let outcome = s.verifier.run_if_enabled(t0());
        assert!(matches!(outcome, VerificationOutcome::RateLimited(_)));
        assert!(!s.verifier.markers().exists(Marker::Failed));
        assert!(!s.verifier.markers().exists(Marker::Complete));
    }

    #[test]
    fn credential_failure_is_not_excused_by_a_rate_limit() {
        let s = setup(true, true, [Behavior::Fail, Behavior::RateLimit, Behavior::Ok]);
        assert!(matches!(s.verifier.run_if_enabled(t0()), VerificationOutcome::Failed(_)));
        assert!(s.verifier.markers().exists(Marker::Failed));
    }

    #[test]
    fn huge_cooldown_keeps_cooling_down() {
        let mut s = setup(true, false, ALL_OK);
        s.verifier.settings.failure_cooldown = Duration::from_secs(u64::MAX);
        s.verifier.markers().write(Marker::Failed, t0(), Some("boom")).unwrap();
        let later = t0() + ChronoDuration::days(365 * 100);
        assert!(!s.verifier.should_run_startup_verification(later));
        assert_eq!(s.calls.get(), 0);
    }

    #[test]
    fn live_in_progress_marker_suppresses_duplicates() {
        let s = setup(true, true, ALL_OK);
        let claim = s.verifier.markers().claim_in_progress(t0()).unwrap();
        assert!(claim.is_some());
        assert!(s.verifier.markers().claim_in_progress(t0()).unwrap().is_none());

        let soon = t0() + ChronoDuration::minutes(30);
        assert_eq!(s.verifier.run_if_enabled(soon), VerificationOutcome::Skipped(Gate::InProgress));
        assert_eq!(s.verifier.run_forced(soon), VerificationOutcome::Skipped(Gate::InProgress));
        assert_eq!(s.calls.get(), 0);

        drop(claim);
        assert!(!s.verifier.markers().exists(Marker::InProgress));
        assert!(s.verifier.should_run_startup_verification(soon));
    }

    #[test]
    fn stale_in_progress_marker_is_removed() {
        let s = setup(true, true, ALL_OK);
        s.verifier.markers().write(Marker::InProgress, t0(), Some("pid 42")).unwrap();

        assert_eq!(s.verifier.gate(t0() + ChronoDuration::hours(1)), Gate::InProgress);
        assert_eq!(s.verifier.gate(t0() + ChronoDuration::hours(3)), Gate::Ready);
        assert!(!s.verifier.markers().exists(Marker::InProgress));
    }

    #[test]
    fn forced_run_ignores_completion() {
        let s = setup(true, true, ALL_OK);
        s.verifier.markers().write(Marker::Complete, t0(), None).unwrap();
        assert_eq!(s.verifier.run_forced(t0()), VerificationOutcome::Verified);
        assert_eq!(s.calls.get(), 3);
    }

    #[test]
    fn unparseable_timestamp_uses_file_time() {
        let dir = TempDir::new().unwrap();
        let markers = MarkerStore::new(dir.path());
        fs::write(markers.path(Marker::Failed), "Verification failed at some point\n").unwrap();
        let ts = markers.timestamp(Marker::Failed).unwrap();
        assert!((Utc::now() - ts).num_seconds().abs() < 60);
    }
}
