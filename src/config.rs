//! Process configuration.
//!
//! Built once at startup from environment-style key/value pairs and handed to
//! each component. Components only ever see their own section.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};

const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";
const MIN_VIDEO_DURATION_SECS: u32 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub schedule: ScheduleConfig,
    pub pipeline: PipelineConfig,
    pub verification: VerificationConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub youtube: YoutubeConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleMode {
    Interval { hours: u32 },
    Daily { hour: u32, timezone: Tz },
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub mode: ScheduleMode,
    /// Late firings beyond this window are skipped.
    pub misfire_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub target_topic: Option<String>,
    pub topics_rotation: Vec<String>,
    pub video_duration_secs: u32,
    pub assembly_timeout: Duration,
    pub min_free_disk_mb: u64,
    pub low_memory_warn_mb: u64,
    pub upload_retries: u32,
    pub upload_backoff: Duration,
    pub cleanup_after_upload: bool,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub enabled: bool,
    pub run_once: bool,
    pub failure_cooldown: Duration,
    pub stale_in_progress: Duration,
    pub marker_dir: PathBuf,
    pub singleton_lock_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    Groq,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub groq_api_key: Option<String>,
    pub groq_model: String,
    pub groq_api_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub category_id: String,
    pub privacy_status: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub piper_model: PathBuf,
    pub background_video: Option<PathBuf>,
    pub fps: u32,
    pub tts_chunk_chars: usize,
    pub align_captions: bool,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let timezone_name = env
            .string("LOCAL_TIMEZONE")
            .or_else(|| env.string("TZ"))
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

        let mode = match env.string("UPLOAD_SCHEDULE_HOUR") {
            Some(raw) => {
                let hour: u32 = raw
                    .parse()
                    .map_err(|_| Error::config(format!("UPLOAD_SCHEDULE_HOUR '{raw}' is not a number")))?;
                if hour > 23 {
                    return Err(Error::config(format!(
                        "UPLOAD_SCHEDULE_HOUR must be between 0 and 23, got {hour}"
                    )));
                }
                ScheduleMode::Daily {
                    hour,
                    timezone: parse_timezone(&timezone_name),
                }
            }
            None => ScheduleMode::Interval {
                hours: env.number("UPLOAD_SCHEDULE_HOURS", 12u32).max(1),
            },
        };

        let target_topic = env.string("TARGET_TOPIC");
        let topics_rotation = env
            .string("TOPICS_ROTATION")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let marker_dir = env.path("STARTUP_MARKER_DIR").unwrap_or_else(default_marker_dir);
        let singleton_lock_path = env
            .path("SINGLETON_LOCK_PATH")
            .unwrap_or_else(|| marker_dir.join(".app_singleton"));

        let provider = match env.string("LLM_PROVIDER").map(|p| p.to_lowercase()).as_deref() {
            Some("groq") => LlmProvider::Groq,
            Some("gemini") | None => LlmProvider::Gemini,
            Some(other) => {
                warn!("Unknown LLM_PROVIDER '{}', using gemini", other);
                LlmProvider::Gemini
            }
        };

        Ok(Self {
            schedule: ScheduleConfig {
                mode,
                misfire_grace: Duration::from_secs(300),
            },
            pipeline: PipelineConfig {
                target_topic,
                topics_rotation,
                video_duration_secs: env
                    .number("TARGET_VIDEO_DURATION", MIN_VIDEO_DURATION_SECS)
                    .max(MIN_VIDEO_DURATION_SECS),
                assembly_timeout: Duration::from_secs(env.number("VIDEO_ASSEMBLY_TIMEOUT_SEC", 600u64)),
                min_free_disk_mb: env.number("MIN_FREE_DISK_MB", 100u64),
                low_memory_warn_mb: env.number("LOW_MEMORY_WARN_MB", 100u64),
                upload_retries: env.number("UPLOAD_RETRIES", 3u32),
                upload_backoff: Duration::from_secs(env.number("UPLOAD_RETRY_BACKOFF_SEC", 5u64)),
                cleanup_after_upload: env.flag("CLEANUP_OUTPUT_AFTER_UPLOAD", true),
                output_dir: env.path("OUTPUT_DIR").unwrap_or_else(|| PathBuf::from("output/shorts")),
            },
            verification: VerificationConfig {
                enabled: env.flag("STARTUP_VERIFICATION", false),
                run_once: env.flag("STARTUP_VERIFICATION_RUN_ONCE", false),
                failure_cooldown: hours(env.number("STARTUP_VERIFICATION_COOLDOWN_HOURS", 6u64)),
                stale_in_progress: hours(env.number("STARTUP_VERIFICATION_STALE_HOURS", 2u64)),
                marker_dir,
                singleton_lock_path,
            },
            server: ServerConfig {
                bind_address: env.string("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: env.number("PORT", 8080u16),
            },
            llm: LlmConfig {
                provider,
                gemini_api_key: env.string("GEMINI_API_KEY").or_else(|| env.string("GOOGLE_API_KEY")),
                gemini_model: env
                    .string("GEMINI_MODEL")
                    .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
                groq_api_key: env.string("GROQ_API_KEY"),
                groq_model: env
                    .string("GROQ_MODEL")
                    .unwrap_or_else(|| "openai/gpt-oss-120b".to_string()),
                groq_api_url: env
                    .string("GROQ_API_URL")
                    .unwrap_or_else(|| "https://api.groq.com/openai/v1/chat/completions".to_string()),
                request_timeout: Duration::from_secs(env.number("LLM_TIMEOUT_SEC", 60u64)),
            },
            youtube: YoutubeConfig {
                client_id: env.string("YOUTUBE_CLIENT_ID"),
                client_secret: env.string("YOUTUBE_CLIENT_SECRET"),
                refresh_token: env.string("YOUTUBE_REFRESH_TOKEN"),
                category_id: env.string("YOUTUBE_CATEGORY_ID").unwrap_or_else(|| "28".to_string()),
                privacy_status: env
                    .string("YOUTUBE_PRIVACY_STATUS")
                    .unwrap_or_else(|| "public".to_string()),
                dry_run: env.flag("DRY_RUN", false),
            },
            media: MediaConfig {
                piper_model: env
                    .path("PIPER_MODEL")
                    .unwrap_or_else(|| PathBuf::from("./tts/en_US-hfc_male-medium.onnx")),
                background_video: env.path("BACKGROUND_VIDEO"),
                fps: env.number("VIDEO_FPS", 24u32).max(1),
                tts_chunk_chars: env.number("TTS_CHUNK_CHARS", 250usize).max(20),
                align_captions: env.flag("ALIGN_CAPTIONS_TO_AUDIO", true),
            },
        })
    }

    /// Keys that must be present for a real (non dry-run) upload cycle.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self.llm.provider {
            LlmProvider::Gemini if self.llm.gemini_api_key.is_none() => missing.push("GEMINI_API_KEY"),
            LlmProvider::Groq if self.llm.groq_api_key.is_none() => missing.push("GROQ_API_KEY"),
            _ => {}
        }
        if !self.youtube.dry_run {
            if self.youtube.client_id.is_none() {
                missing.push("YOUTUBE_CLIENT_ID");
            }
            if self.youtube.client_secret.is_none() {
                missing.push("YOUTUBE_CLIENT_SECRET");
            }
            if self.youtube.refresh_token.is_none() {
                missing.push("YOUTUBE_REFRESH_TOKEN");
            }
        }
        missing
    }

    /// Human readable dump with secrets redacted.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let schedule = match &self.schedule.mode {
            ScheduleMode::Interval { hours } => format!("every {hours} hours"),
            ScheduleMode::Daily { hour, timezone } => format!("daily at {hour:02}:00 ({timezone})"),
        };
        let topic = match (&self.pipeline.target_topic, self.pipeline.topics_rotation.is_empty()) {
            (Some(t), _) if !wants_rotation(t) => t.clone(),
            (_, false) => format!("rotate {:?}", self.pipeline.topics_rotation),
            (_, true) => "Python".to_string(),
        };
        vec![
            ("schedule", schedule),
            ("topic", topic),
            ("video duration", format!("{}s", self.pipeline.video_duration_secs)),
            ("assembly timeout", format!("{}s", self.pipeline.assembly_timeout.as_secs())),
            ("min free disk", format!("{} MB", self.pipeline.min_free_disk_mb)),
            (
                "upload retries",
                format!(
                    "{} (backoff {}s)",
                    self.pipeline.upload_retries,
                    self.pipeline.upload_backoff.as_secs()
                ),
            ),
            ("cleanup after upload", self.pipeline.cleanup_after_upload.to_string()),
            ("output dir", self.pipeline.output_dir.display().to_string()),
            (
                "startup verification",
                format!(
                    "enabled={} run_once={} cooldown={}h",
                    self.verification.enabled,
                    self.verification.run_once,
                    self.verification.failure_cooldown.as_secs() / 3600
                ),
            ),
            ("marker dir", self.verification.marker_dir.display().to_string()),
            ("singleton lock", self.verification.singleton_lock_path.display().to_string()),
            ("port", self.server.port.to_string()),
            ("llm provider", format!("{:?}", self.llm.provider).to_lowercase()),
            ("llm api key", redact(self.active_llm_key())),
            ("youtube client id", redact(self.youtube.client_id.as_deref())),
            ("youtube refresh token", redact(self.youtube.refresh_token.as_deref())),
            ("dry run", self.youtube.dry_run.to_string()),
        ]
    }

    fn active_llm_key(&self) -> Option<&str> {
        match self.llm.provider {
            LlmProvider::Gemini => self.llm.gemini_api_key.as_deref(),
            LlmProvider::Groq => self.llm.groq_api_key.as_deref(),
        }
    }
}

/// `random` and `rotate` ask for a pick from the rotation list.
pub fn wants_rotation(topic: &str) -> bool {
    let t = topic.trim().to_lowercase();
    t.is_empty() || t == "random" || t == "rotate"
}

pub fn parse_timezone(name: &str) -> Tz {
    name.parse().unwrap_or_else(|_| {
        warn!("Invalid timezone '{}', falling back to UTC", name);
        chrono_tz::UTC
    })
}

fn default_marker_dir() -> PathBuf {
    let data = Path::new("/data");
    if data.is_dir() {
        data.to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

fn redact(value: Option<&str>) -> String {
    match value {
        Some(v) if v.chars().count() > 4 => format!("{}****", v.chars().take(4).collect::<String>()),
        Some(_) => "****".to_string(),
        None => "<unset>".to_string(),
    }
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    fn number<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + Copy + std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid value '{}' for {}, using {}", raw, key, default);
                default
            }),
            None => default,
        }
    }
}
