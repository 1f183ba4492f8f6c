//! Wires configuration into concrete collaborators.
//!
//! Everything here builds blocking HTTP clients, so it must run off the async
//! runtime (inside `spawn_blocking` or on a plain thread).

use std::sync::Arc;

use tracing::{info, warn};

use crate::assembler::FfmpegAssembler;
use crate::config::Config;
use crate::error::Result;
use crate::liveness::Liveness;
use crate::llm::LlmContentGenerator;
use crate::pipeline::{Collaborators, Pipeline};
use crate::publisher::{DryRunPublisher, YoutubePublisher};
use crate::resources::{ResourceGuard, SysinfoProbe};
use crate::scheduler::{Scheduler, SharedStatus, Trigger};
use crate::stages::{Publisher, SpeechSynthesizer};
use crate::thumbnail::FfmpegThumbnailRenderer;
use crate::tts::{EspeakSynthesizer, FallbackSynthesizer, PiperSynthesizer};
use crate::verify::{StartupVerifier, VerificationChecks, VerificationOutcome};

pub struct App {
    pub pipeline: Arc<Pipeline>,
    pub verifier: StartupVerifier,
}

impl App {
    pub fn build(config: &Config, liveness: Liveness) -> Result<Self> {
        for key in config.missing_credentials() {
            warn!("{} is not set", key);
        }

        let speech: Arc<dyn SpeechSynthesizer> = Arc::new(FallbackSynthesizer::new(
            Box::new(PiperSynthesizer::new(&config.media.piper_model)),
            Box::new(EspeakSynthesizer::default()),
        ));
        let publisher: Arc<dyn Publisher> = if config.youtube.dry_run {
            info!("DRY_RUN=true: uploads are simulated");
            Arc::new(DryRunPublisher)
        } else {
            Arc::new(YoutubePublisher::new(&config.youtube)?)
        };
        let thumbnails = Arc::new(FfmpegThumbnailRenderer::default());

        let collaborators = Collaborators {
            content: Arc::new(LlmContentGenerator::new(config.llm.clone())?),
            thumbnails: thumbnails.clone(),
            assembler: Arc::new(FfmpegAssembler::new(speech.clone(), config.media.clone())),
            publisher: publisher.clone(),
        };

        let settings = &config.pipeline;
        let guard = ResourceGuard::new(
            Box::new(SysinfoProbe::new()),
            &settings.output_dir,
            settings.min_free_disk_mb,
            settings.low_memory_warn_mb,
            settings.cleanup_after_upload,
        );
        let pipeline = Pipeline::new(settings.clone(), collaborators, guard, liveness);

        let verifier = StartupVerifier::new(
            config.verification.clone(),
            VerificationChecks {
                publisher,
                thumbnails,
                speech,
            },
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            verifier,
        })
    }

    /// Startup verification, then the scheduler. Only the singleton owner
    /// calls this.
    pub fn start_owner_duties(self, config: &Config, status: SharedStatus) -> Result<Scheduler> {
        match self.verifier.run_if_enabled(chrono::Utc::now()) {
            VerificationOutcome::Verified => info!("Startup verification passed"),
            VerificationOutcome::Failed(reason) => {
                warn!("Startup verification failed ({}); continuing with the scheduler", reason)
            }
            VerificationOutcome::RateLimited(reason) => {
                warn!("Startup verification disabled for this boot: {}", reason)
            }
            VerificationOutcome::Skipped(_) => {}
        }

        let trigger = Trigger::from_mode(&config.schedule.mode)?;
        info!("Scheduling shorts generation {}", trigger.describe());
        let pipeline = self.pipeline;
        Scheduler::start(trigger, config.schedule.misfire_grace, status, move || pipeline.run())
    }
}
