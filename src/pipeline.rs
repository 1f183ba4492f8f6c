//! Stage sequencer for one shorts generation run.
//!
//! Order: topic, idea, script, (audio deferred to assembly), captions,
//! thumbnail, assembly, upload, cleanup. Idea, script and assembly failures end
//! the run; a missing thumbnail does not; upload fails only after its retries.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::captions::{derive_captions, write_srt};
use crate::config::{PipelineConfig, wants_rotation};
use crate::error::Error;
use crate::handoff::run_with_timeout;
use crate::liveness::Liveness;
use crate::metadata::build_metadata;
use crate::resources::ResourceGuard;
use crate::retry::publish_with_retries;
use crate::run_lock::RunLock;
use crate::stages::{AssemblyJob, ContentGenerator, MediaAssembler, Publisher, ThumbnailRenderer};
use crate::utils::{remove_dir_best_effort, run_timestamp, truncate_chars};

pub const ASSEMBLY_STAGE: &str = "Video Assembly";
pub const UPLOAD_STAGE: &str = "YouTube Upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    /// Every upload attempt failed.
    Failed,
    Skipped,
    /// A fatal stage error.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub video_id: Option<String>,
    pub timestamp: String,
    pub topic: Option<String>,
    pub error: Option<String>,
}

impl RunResult {
    fn skipped(timestamp: String, reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Skipped,
            video_id: None,
            timestamp,
            topic: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// External collaborators the stages call into.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentGenerator>,
    pub thumbnails: Arc<dyn ThumbnailRenderer>,
    pub assembler: Arc<dyn MediaAssembler>,
    pub publisher: Arc<dyn Publisher>,
}

struct StageFailure {
    topic: Option<String>,
    error: Error,
    during_upload: bool,
}

pub struct Pipeline {
    settings: PipelineConfig,
    collaborators: Collaborators,
    run_lock: RunLock,
    guard: Mutex<ResourceGuard>,
    liveness: Liveness,
}

impl Pipeline {
    pub fn new(
        settings: PipelineConfig,
        collaborators: Collaborators,
        guard: ResourceGuard,
        liveness: Liveness,
    ) -> Self {
        Self {
            settings,
            collaborators,
            run_lock: RunLock::new(),
            guard: Mutex::new(guard),
            liveness,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.settings.output_dir
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.is_held()
    }

    /// One full run using the configured topic selection.
    pub fn run(&self) -> RunResult {
        self.run_with_topic(None)
    }

    /// One full run. Never panics and never returns an `Err`: every failure
    /// is folded into the result.
    pub fn run_with_topic(&self, topic_override: Option<&str>) -> RunResult {
        let timestamp = run_timestamp();
        let Some(_run_guard) = self.run_lock.try_acquire() else {
            warn!("Task already running. Skipping this cycle.");
            return RunResult::skipped(timestamp, "task already running");
        };

        info!("{}", "=".repeat(80));
        info!(timestamp = %timestamp, "Starting shorts generation task");
        info!("{}", "=".repeat(80));

        let report = self.guard.lock().check();
        if !report.ok {
            let reason = report.reason.unwrap_or_else(|| "insufficient disk space".to_string());
            return RunResult::skipped(timestamp, reason);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(&timestamp, topic_override)))
            .unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(StageFailure {
                    topic: None,
                    error: Error::Panic(message),
                    during_upload: false,
                })
            });

        self.liveness.clear();
        if self.settings.cleanup_after_upload {
            info!("Cleaning up temporary files");
            remove_dir_best_effort(&self.settings.output_dir);
        } else {
            info!("Cleanup disabled (CLEANUP_OUTPUT_AFTER_UPLOAD=false)");
        }

        match outcome {
            Ok((topic, video_id)) => {
                info!(video_id = %video_id, "Shorts generation complete");
                RunResult {
                    status: RunStatus::Success,
                    video_id: Some(video_id),
                    timestamp,
                    topic: Some(topic),
                    error: None,
                }
            }
            Err(StageFailure {
                topic,
                error,
                during_upload,
            }) => {
                if error.is_timeout() {
                    error!("Shorts generation timed out ({}); consider raising the stage timeout", error);
                } else {
                    error!("Shorts generation failed: {}", error);
                }
                if let Some(trace) = error.trace() {
                    debug!("{}", trace);
                }
                let status = if during_upload {
                    RunStatus::Failed
                } else {
                    RunStatus::Error
                };
                RunResult {
                    status,
                    video_id: None,
                    timestamp,
                    topic,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    fn run_stages(
        &self,
        timestamp: &str,
        topic_override: Option<&str>,
    ) -> std::result::Result<(String, String), StageFailure> {
        let topic = self.select_topic(topic_override);
        let fail = |error: Error| StageFailure {
            topic: Some(topic.clone()),
            error,
            during_upload: false,
        };
        let duration = self.settings.video_duration_secs;
        let out_dir = &self.settings.output_dir;

        info!(topic = %topic, duration, "Topic: {} ({}s)", topic, duration);

        info!("[1/7] Generating viral idea");
        let ideas = self
            .collaborators
            .content
            .generate_ideas(&topic, 1, duration)
            .map_err(&fail)?;
        let Some(idea) = ideas.into_iter().next() else {
            return Err(fail(Error::NoIdeas(topic.clone())));
        };
        info!("Idea: {}", idea.title);
        debug!("Hook: {}", truncate_chars(&idea.hook, 100));

        info!("[2/7] Creating optimized script");
        let script = self
            .collaborators
            .content
            .create_script(&idea, &topic, duration)
            .map_err(&fail)?
            .into_script(duration);
        info!(
            words = script.text.split_whitespace().count(),
            cues = script.visual_cues.len(),
            "Script created"
        );

        info!("[3/7] Narration is synthesized per segment during assembly");

        info!("[4/7] Generating captions");
        let captions = derive_captions(&script);
        let srt_path = out_dir.join(format!("captions_{timestamp}.srt"));
        let captions_path = match write_srt(&srt_path, &captions) {
            Ok(()) => Some(srt_path),
            Err(e) => {
                warn!("Failed to save captions: {}", e);
                None
            }
        };

        info!("[5/7] Generating thumbnail");
        let thumbnail_path = match self.collaborators.thumbnails.render(&idea.title, out_dir) {
            Ok(path) => {
                info!("Thumbnail: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Thumbnail generation failed, continuing without one: {}", e);
                None
            }
        };

        info!("[6/7] Assembling final video");
        let job = AssemblyJob {
            script: script.clone(),
            captions_path,
            thumbnail_path: thumbnail_path.clone(),
            title: idea.title.clone(),
            output_file: out_dir.join(format!("video_{timestamp}.mp4")),
            work_dir: out_dir.join(format!("work_{timestamp}")),
            timestamp: timestamp.to_string(),
        };
        let video_path: PathBuf = {
            let _processing = self.liveness.enter(ASSEMBLY_STAGE);
            let assembler = self.collaborators.assembler.clone();
            run_with_timeout(ASSEMBLY_STAGE, self.settings.assembly_timeout, move || {
                assembler.assemble(&job)
            })
            .map_err(&fail)?
        };
        info!("Video created: {}", video_path.display());

        info!("[7/7] Uploading");
        let metadata = build_metadata(&script, &idea, &topic);
        let video_id = {
            let _processing = self.liveness.enter(UPLOAD_STAGE);
            let publisher = &self.collaborators.publisher;
            publish_with_retries(
                || publisher.upload(&video_path, &metadata, thumbnail_path.as_deref()),
                self.settings.upload_retries,
                self.settings.upload_backoff,
            )
            .map_err(|error| StageFailure {
                during_upload: true,
                ..fail(error)
            })?
        };
        info!("Video uploaded! ID: {} (https://youtube.com/shorts/{})", video_id, video_id);

        Ok((topic, video_id))
    }

    fn select_topic(&self, topic_override: Option<&str>) -> String {
        if let Some(topic) = topic_override.map(str::trim).filter(|t| !wants_rotation(t)) {
            return topic.to_string();
        }
        if let Some(topic) = self
            .settings
            .target_topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !wants_rotation(t))
        {
            return topic.to_string();
        }
        let mut rng = rand::rng();
        self.settings
            .topics_rotation
            .choose(&mut rng)
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| "Python".to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::error::Result;
    use crate::resources::ResourceProbe;
    use crate::stages::{Idea, Script, ScriptDraft, VideoMetadata, VisualCue};

    struct PlentyOfDisk(u64);

    impl ResourceProbe for PlentyOfDisk {
        fn free_disk_bytes(&mut self, _path: &Path) -> io::Result<u64> {
            Ok(self.0)
        }

        fn available_memory_bytes(&mut self) -> Option<u64> {
            None
        }
    }

    struct FakeContent {
        ideas: usize,
    }

    impl ContentGenerator for FakeContent {
        fn generate_ideas(&self, topic: &str, _count: usize, _duration: u32) -> Result<Vec<Idea>> {
            Ok((0..self.ideas)
                .map(|_| Idea {
                    title: format!("{topic} in 30 seconds"),
                    hook: "You are doing it wrong.".to_string(),
                    ..Idea::default()
                })
                .collect())
        }

        fn create_script(&self, _idea: &Idea, _topic: &str, duration: u32) -> Result<ScriptDraft> {
            Ok(ScriptDraft::Structured(Script {
                text: "You are doing it wrong. [PAUSE] Here is the fix.".to_string(),
                duration_seconds: duration,
                visual_cues: vec![
                    VisualCue {
                        time_seconds: 0.0,
                        duration_seconds: Some(10.0),
                        content: "Hook".to_string(),
                    },
                    VisualCue {
                        time_seconds: 10.0,
                        duration_seconds: Some(20.0),
                        content: "Fix".to_string(),
                    },
                ],
                keywords: vec!["demo".to_string()],
            }))
        }
    }

    struct FakeThumbnails {
        fail: bool,
    }

    impl ThumbnailRenderer for FakeThumbnails {
        fn render(&self, _title: &str, output_dir: &Path) -> Result<PathBuf> {
            if self.fail {
                return Err(Error::Thumbnail("no font".to_string()));
            }
            fs::create_dir_all(output_dir)?;
            let path = output_dir.join("thumbnail.png");
            fs::write(&path, b"png")?;
            Ok(path)
        }
    }

    enum AssemblyBehavior {
        Succeed,
        Sleep(Duration),
        Fail,
        /// Signals when started, then blocks until released.
        Block(Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>),
    }

    struct FakeAssembler {
        behavior: AssemblyBehavior,
        seen_thumbnail: Mutex<Option<Option<PathBuf>>>,
    }

    impl FakeAssembler {
        fn new(behavior: AssemblyBehavior) -> Self {
            Self {
                behavior,
                seen_thumbnail: Mutex::new(None),
            }
        }
    }

    impl MediaAssembler for FakeAssembler {
        fn assemble(&self, job: &AssemblyJob) -> Result<PathBuf> {
            *self.seen_thumbnail.lock() = Some(job.thumbnail_path.clone());
            match &self.behavior {
                AssemblyBehavior::Succeed => {}
                AssemblyBehavior::Sleep(d) => thread::sleep(*d),
                AssemblyBehavior::Fail => return Err(Error::Assembly("encoder crashed".to_string())),
                AssemblyBehavior::Block(channels) => {
                    if let Some((started, release)) = channels.lock().take() {
                        let _ = started.send(());
                        let _ = release.recv();
                    }
                }
            }
            assert_eq!(job.script.visual_cues.len(), 2);
            fs::write(&job.output_file, b"mp4")?;
            Ok(job.output_file.clone())
        }
    }

    struct FakePublisher {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl Publisher for FakePublisher {
        fn upload(&self, video: &Path, metadata: &VideoMetadata, _thumbnail: Option<&Path>) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(video.exists());
            assert!(!metadata.title.is_empty());
            if call <= self.fail_first {
                Err(Error::Publish("quota hiccup".to_string()))
            } else {
                Ok("abc123XYZ9_".to_string())
            }
        }

        fn verify_credentials(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        _temp: TempDir,
        out_dir: PathBuf,
        pipeline: Arc<Pipeline>,
        assembler: Arc<FakeAssembler>,
        publisher: Arc<FakePublisher>,
        liveness: Liveness,
    }

    fn harness(
        ideas: usize,
        thumbnail_fails: bool,
        behavior: AssemblyBehavior,
        publish_failures: usize,
        free_mb: u64,
    ) -> Harness {
        harness_with(ideas, thumbnail_fails, behavior, publish_failures, free_mb, |_| {})
    }

    fn harness_with(
        ideas: usize,
        thumbnail_fails: bool,
        behavior: AssemblyBehavior,
        publish_failures: usize,
        free_mb: u64,
        tweak: impl FnOnce(&mut PipelineConfig),
    ) -> Harness {
        let temp = TempDir::new().unwrap();
        let out_dir = temp.path().join("output/shorts");
        let mut settings = PipelineConfig {
            target_topic: Some("demo".to_string()),
            topics_rotation: vec![],
            video_duration_secs: 30,
            assembly_timeout: Duration::from_millis(300),
            min_free_disk_mb: 100,
            low_memory_warn_mb: 100,
            upload_retries: 3,
            upload_backoff: Duration::ZERO,
            cleanup_after_upload: true,
            output_dir: out_dir.clone(),
        };
        tweak(&mut settings);
        let assembler = Arc::new(FakeAssembler::new(behavior));
        let publisher = Arc::new(FakePublisher {
            calls: AtomicUsize::new(0),
            fail_first: publish_failures,
        });
        let liveness = Liveness::new();
        let guard = ResourceGuard::new(
            Box::new(PlentyOfDisk(free_mb * 1024 * 1024)),
            &out_dir,
            100,
            100,
            settings.cleanup_after_upload,
        );
        let pipeline = Pipeline::new(
            settings,
            Collaborators {
                content: Arc::new(FakeContent { ideas }),
                thumbnails: Arc::new(FakeThumbnails { fail: thumbnail_fails }),
                assembler: assembler.clone(),
                publisher: publisher.clone(),
            },
            guard,
            liveness.clone(),
        );
        Harness {
            _temp: temp,
            out_dir,
            pipeline: Arc::new(pipeline),
            assembler,
            publisher,
            liveness,
        }
    }

    #[test]
    fn happy_path_uploads_and_cleans_up() {
        let h = harness(1, false, AssemblyBehavior::Succeed, 0, 10_000);
        let result = h.pipeline.run();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.video_id.as_deref(), Some("abc123XYZ9_"));
        assert_eq!(result.topic.as_deref(), Some("demo"));
        assert!(result.error.is_none());
        assert_eq!(h.publisher.calls.load(Ordering::SeqCst), 1);
        assert!(!h.out_dir.exists());
        assert!(!h.pipeline.is_running());
        assert!(!h.liveness.snapshot().is_processing);
    }

    #[test]
    fn upload_retries_then_succeeds() {
        let h = harness(1, false, AssemblyBehavior::Succeed, 1, 10_000);
        let result = h.pipeline.run();
        assert!(result.is_success());
        assert_eq!(h.publisher.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exhausted_uploads_fail_the_run() {
        let h = harness(1, false, AssemblyBehavior::Succeed, 10, 10_000);
        let result = h.pipeline.run();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(h.publisher.calls.load(Ordering::SeqCst), 3);
        assert!(result.error.unwrap().contains("quota hiccup"));
        assert!(!h.out_dir.exists());
        assert!(h.pipeline.run_lock.try_acquire().is_some());
    }

    #[test]
    fn zero_ideas_is_fatal() {
        let h = harness(0, false, AssemblyBehavior::Succeed, 0, 10_000);
        let result = h.pipeline.run();
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.error.unwrap().contains("No ideas"));
        assert_eq!(h.publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn thumbnail_failure_is_tolerated() {
        let h = harness(1, true, AssemblyBehavior::Succeed, 0, 10_000);
        let result = h.pipeline.run();
        assert!(result.is_success());
        assert_eq!(*h.assembler.seen_thumbnail.lock(), Some(None));
    }

    #[test]
    fn assembly_failure_is_fatal() {
        let h = harness(1, false, AssemblyBehavior::Fail, 0, 10_000);
        let result = h.pipeline.run();
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.error.unwrap().contains("encoder crashed"));
        assert!(!h.pipeline.is_running());
    }

    #[test]
    fn assembly_timeout_releases_lock() {
        let h = harness(1, false, AssemblyBehavior::Sleep(Duration::from_secs(2)), 0, 10_000);
        let result = h.pipeline.run();
        assert_eq!(result.status, RunStatus::Error);
        assert!(result.error.unwrap().contains("exceeded timeout"));
        assert!(!h.pipeline.is_running());
        assert!(!h.liveness.snapshot().is_processing);
        assert_eq!(h.publisher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn low_disk_skips_run() {
        let h = harness(1, false, AssemblyBehavior::Succeed, 0, 99);
        let result = h.pipeline.run();
        assert_eq!(result.status, RunStatus::Skipped);
        assert!(result.error.unwrap().contains("Insufficient disk space"));
        assert!(!h.pipeline.is_running());
    }

    #[test]
    fn overlapping_run_is_skipped() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let mut h = harness(
            1,
            false,
            AssemblyBehavior::Block(Mutex::new(Some((started_tx, release_rx)))),
            0,
            10_000,
        );
        // the blocked worker must outlive the handoff deadline
        Arc::get_mut(&mut h.pipeline).unwrap().settings.assembly_timeout = Duration::from_secs(10);

        let pipeline = h.pipeline.clone();
        let first = thread::spawn(move || pipeline.run());
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(h.liveness.snapshot().current_task.as_deref(), Some(ASSEMBLY_STAGE));
        let second = h.pipeline.run();
        assert_eq!(second.status, RunStatus::Skipped);
        assert_eq!(second.error.as_deref(), Some("task already running"));

        release_tx.send(()).unwrap();
        let first = first.join().unwrap();
        assert!(first.is_success());
        assert!(h.pipeline.run_lock.try_acquire().is_some());
    }

    #[test]
    fn explicit_topic_overrides_rotation() {
        let h = harness(1, false, AssemblyBehavior::Succeed, 0, 10_000);
        let result = h.pipeline.run_with_topic(Some("Verification Test"));
        assert_eq!(result.topic.as_deref(), Some("Verification Test"));
    }

    #[test]
    fn random_topic_comes_from_rotation() {
        let mut h = harness(1, false, AssemblyBehavior::Succeed, 0, 10_000);
        {
            let pipeline = Arc::get_mut(&mut h.pipeline).unwrap();
            pipeline.settings.target_topic = Some("random".to_string());
            pipeline.settings.topics_rotation = vec!["Rust".to_string(), "Git".to_string()];
        }
        let topic = h.pipeline.select_topic(None);
        assert!(topic == "Rust" || topic == "Git");
    }

    #[test]
    fn unset_topic_picks_from_rotation() {
        let h = harness_with(1, false, AssemblyBehavior::Succeed, 0, 10_000, |settings| {
            settings.target_topic = None;
            settings.topics_rotation = vec!["Rust".to_string(), "Git".to_string()];
        });
        let result = h.pipeline.run();
        assert!(result.is_success());
        let topic = result.topic.unwrap();
        assert!(topic == "Rust" || topic == "Git", "unexpected topic {topic}");
    }

    #[test]
    fn unset_topic_without_rotation_defaults_to_python() {
        let h = harness_with(1, false, AssemblyBehavior::Succeed, 0, 10_000, |settings| {
            settings.target_topic = None;
        });
        assert_eq!(h.pipeline.select_topic(None), "Python");
    }

    #[test]
    fn output_is_kept_when_cleanup_is_off() {
        let h = harness_with(1, false, AssemblyBehavior::Succeed, 0, 10_000, |settings| {
            settings.cleanup_after_upload = false;
        });
        let result = h.pipeline.run();
        assert!(result.is_success());
        assert!(h.out_dir.exists());
    }

    #[test]
    fn low_disk_keeps_output_when_cleanup_is_off() {
        let h = harness_with(1, false, AssemblyBehavior::Succeed, 0, 99, |settings| {
            settings.cleanup_after_upload = false;
        });
        fs::create_dir_all(h.out_dir.join("old_run")).unwrap();
        let result = h.pipeline.run();
        assert_eq!(result.status, RunStatus::Skipped);
        assert!(h.out_dir.join("old_run").exists());
    }
}
