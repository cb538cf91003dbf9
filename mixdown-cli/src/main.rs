mod cli;
mod config;
mod job;

use crate::cli::CliArgs;
use crate::config::{AppConfig, LoggingConfig};
use anyhow::Context;
use clap::Parser;
use mixdown_audio::MixerEvent;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Progress is logged in steps of this many percent.
const PROGRESS_LOG_STEP: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    init_tracing(&config.logging);

    tracing::trace!(?config, "Parsed config");
    config.validate()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut mixer = job::build_mixer(&config)?.with_listener(tx);
    mixer.start().context("Failed to start mixer")?;
    tracing::info!(
        output = %config.output.path.display(),
        inputs = config.inputs.len(),
        duration_us = mixer.output_duration_us(),
        sample_rate = ?mixer.output_sample_rate(),
        channels = ?mixer.output_channel_count(),
        "Mixing"
    );
    mixer.process_async()?;

    let mut logged = 0;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(MixerEvent::Progress(progress)) => {
                    let percent = (progress * 100.0) as u32;
                    if percent >= logged + PROGRESS_LOG_STEP {
                        tracing::info!(percent, "Progress");
                        logged = percent;
                    }
                }
                Some(MixerEvent::Error(err)) => tracing::error!(%err, "Mixing failed"),
                Some(MixerEvent::End) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, stopping");
                mixer.release().await;
                anyhow::bail!("Mixing cancelled at {:.0}%", mixer.progress() * 100.0);
            }
        }
    }

    mixer.wait().await.context("Mixing failed")?;
    mixer.release().await;
    tracing::info!(output = %config.output.path.display(), "Mixing completed");
    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
