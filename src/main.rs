mod app;
mod args;
mod assembler;
mod audio;
mod captions;
mod config;
mod error;
mod ffmpeg;
mod handoff;
mod liveness;
mod llm;
mod metadata;
mod pipeline;
mod publisher;
mod resources;
mod retry;
mod run_lock;
mod scheduler;
mod server;
mod singleton;
mod stages;
mod thumbnail;
mod tts;
mod utils;
mod verify;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::task::spawn_blocking;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::args::{Args, Command};
use crate::config::Config;
use crate::liveness::Liveness;
use crate::scheduler::SharedStatus;
use crate::server::AppState;
use crate::singleton::SingletonLock;
use crate::verify::VerificationOutcome;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let env_file = dotenvy::from_path(&args.env_file);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match env_file {
        Ok(()) => info!("Loaded environment from {}", args.env_file.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Could not read {}: {}", args.env_file.display(), e),
    }

    let config = Config::from_env().context("invalid configuration")?;

    match args.command {
        Command::CheckConfig => {
            for (key, value) in config.summary() {
                println!("{key:>22}: {value}");
            }
            let missing = config.missing_credentials();
            if !missing.is_empty() {
                println!("{:>22}: {}", "missing", missing.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::RunOnce { topic } => run_once(config, topic).await,
        Command::Verify { force } => verify(config, force).await,
        Command::Serve { port } => serve(config, port).await,
    }
}

async fn run_once(config: Config, topic: Option<String>) -> anyhow::Result<ExitCode> {
    info!("Running shorts generation once...");
    let result = spawn_blocking(move || -> anyhow::Result<_> {
        let app = App::build(&config, Liveness::new()).context("building pipeline")?;
        Ok(app.pipeline.run_with_topic(topic.as_deref()))
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn verify(config: Config, force: bool) -> anyhow::Result<ExitCode> {
    let outcome = spawn_blocking(move || -> anyhow::Result<_> {
        let app = App::build(&config, Liveness::new()).context("building verifier")?;
        let now = chrono::Utc::now();
        Ok(if force {
            app.verifier.run_forced(now)
        } else {
            app.verifier.run_if_enabled(now)
        })
    })
    .await??;

    println!("{outcome:?}");
    Ok(match outcome {
        VerificationOutcome::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<ExitCode> {
    let port = port.unwrap_or(config.server.port);
    let liveness = Liveness::new();
    let status = SharedStatus::default();

    let lock_path = config.verification.singleton_lock_path.clone();
    let singleton = spawn_blocking(move || SingletonLock::claim(lock_path)).await?;

    let owner_duties = if singleton.is_owner() {
        let (config, liveness, status) = (config.clone(), liveness.clone(), status.clone());
        Some(spawn_blocking(move || {
            App::build(&config, liveness).and_then(|app| app.start_owner_duties(&config, status))
        }))
    } else {
        info!("This process does not hold the singleton lock; serving liveness only");
        None
    };

    let state = AppState::new(liveness, status);
    let served = server::serve(state, &config.server.bind_address, port, shutdown_signal()).await;

    if let Some(task) = owner_duties {
        match task.await {
            Ok(Ok(mut scheduler)) => spawn_blocking(move || scheduler.stop()).await?,
            Ok(Err(e)) => error!("Scheduler did not start: {}", e),
            Err(e) => error!("Startup task panicked: {}", e),
        }
    }
    spawn_blocking(move || singleton.release()).await?;

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
