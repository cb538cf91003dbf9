//! The mixing engine.
//!
//! An [`AudioMixer`] owns an ordered list of [`AudioSource`]s, an encoder and a
//! container writer. [`AudioMixer::start`] negotiates the output format and
//! registers the output track; [`AudioMixer::process_sync`] or
//! [`AudioMixer::process_async`] then pumps mixed PCM through the encoder into
//! the container until every source is exhausted or the run is stopped.

mod mix;
mod pump;

use crate::codec::{AudioEncoder, Muxer, SharedMuxer, shared_muxer};
use crate::config::{
    DEFAULT_BIT_RATE, DEFAULT_CHANNEL_COUNT, DEFAULT_SAMPLE_RATE, MixerConfig, MixingType,
};
use crate::error::{MixerError, Result};
use crate::listener::ProgressListener;
use crate::resample::ResamplerCache;
use crate::sources::AudioSource;
use mix::SourceMix;
use pump::{OutputFormat, Pipeline};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerState {
    /// Accepting sources and configuration.
    Idle,
    /// Format negotiated and output track registered.
    Started,
    Processing,
    /// Processing finished, failed or was stopped.
    Done,
    Released,
}

/// Progress shared between the engine and its worker.
#[derive(Debug, Clone, Default)]
pub(crate) struct Progress(Arc<AtomicU64>);

impl Progress {
    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, progress: f64) {
        self.0.store(progress.to_bits(), Ordering::Relaxed);
    }
}

pub struct AudioMixer {
    config: MixerConfig,
    cache: ResamplerCache,
    sources: Vec<Box<dyn AudioSource>>,
    encoder: Option<Box<dyn AudioEncoder>>,
    muxer: SharedMuxer,
    owns_muxer: bool,
    listener: Option<Box<dyn ProgressListener>>,
    state: MixerState,
    source_count: usize,
    format: Option<OutputFormat>,
    output_duration_us: u64,
    pipeline: Option<Pipeline>,
    task: Option<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    processing: Arc<AtomicBool>,
    progress: Progress,
}

impl AudioMixer {
    /// Mixer owning its container writer: it starts, stops and releases it.
    pub fn new(encoder: impl AudioEncoder + 'static, muxer: impl Muxer + 'static) -> Self {
        Self::build(Box::new(encoder), shared_muxer(muxer), true)
    }

    /// Mixer writing into a container shared with other pipelines. The engine
    /// only registers its track and writes samples; starting the container
    /// after [`start`](Self::start) and finalizing it is left to the caller.
    pub fn with_shared_muxer(encoder: impl AudioEncoder + 'static, muxer: SharedMuxer) -> Self {
        Self::build(Box::new(encoder), muxer, false)
    }

    fn build(encoder: Box<dyn AudioEncoder>, muxer: SharedMuxer, owns_muxer: bool) -> Self {
        let config = MixerConfig::default();
        Self {
            cache: ResamplerCache::new(config.resampler),
            config,
            sources: Vec::new(),
            encoder: Some(encoder),
            muxer,
            owns_muxer,
            listener: None,
            state: MixerState::Idle,
            source_count: 0,
            format: None,
            output_duration_us: 0,
            pipeline: None,
            task: None,
            cancel: CancellationToken::new(),
            processing: Arc::new(AtomicBool::new(false)),
            progress: Progress::default(),
        }
    }

    pub fn with_config(mut self, config: MixerConfig) -> Self {
        if config.resampler != self.cache.quality() {
            self.cache = ResamplerCache::new(config.resampler);
        }
        self.config = config;
        self
    }

    /// Shares a resampler pool with other mixers.
    pub fn with_resampler_cache(mut self, cache: ResamplerCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_listener(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    #[instrument(level = "debug", skip(self, source), err)]
    pub fn add_source(&mut self, source: impl AudioSource + 'static) -> Result<()> {
        self.ensure_idle("sources can only be added before start")?;
        self.sources.push(Box::new(source));
        self.source_count = self.sources.len();
        tracing::debug!(
            duration_us = self.sources.last().map(|s| s.duration_us()),
            "Added audio source"
        );
        Ok(())
    }

    /// Computes the output duration, negotiates the output format, starts every
    /// source and the encoder and registers the output track with the container.
    ///
    /// Without sources this fails with [`MixerError::Config`] and the mixer stays
    /// idle. Any later failure releases all resources.
    #[instrument(level = "debug", skip(self), fields(sources = self.sources.len()), err)]
    pub fn start(&mut self) -> Result<()> {
        self.ensure_idle("mixer has already been started")?;
        if self.sources.is_empty() {
            return Err(MixerError::Config(
                "at least one audio source is required".to_string(),
            ));
        }
        let Some(encoder) = self.encoder.take() else {
            return Err(MixerError::InvalidState("encoder has already been released"));
        };

        let output_duration_us = self.prepare_sources();
        let format = self.negotiate_format();
        for source in &mut self.sources {
            source.set_resampler_cache(self.cache.clone());
        }

        let mut pipeline = Pipeline::new(
            SourceMix::new(std::mem::take(&mut self.sources), self.config.mixing_type),
            encoder,
            self.muxer.clone(),
            self.owns_muxer,
            format,
            self.config.max_input_size,
            output_duration_us,
            self.progress.clone(),
        );
        pipeline.set_listener(self.listener.take());

        if let Err(err) = pipeline.open(&self.cancel) {
            pipeline.release();
            self.state = MixerState::Released;
            return Err(err);
        }

        tracing::info!(?format, output_duration_us, mixing_type = ?self.config.mixing_type, "Mixer started");
        self.format = Some(format);
        self.output_duration_us = output_duration_us;
        self.pipeline = Some(pipeline);
        self.state = MixerState::Started;
        Ok(())
    }

    /// Applies the discipline's looping rules and returns the output duration.
    fn prepare_sources(&mut self) -> u64 {
        match self.config.mixing_type {
            MixingType::Parallel => {
                let mut base = 0;
                for (i, source) in self.sources.iter().enumerate() {
                    if source.duration_us() > self.sources[base].duration_us() {
                        base = i;
                    }
                }
                if self.config.looping_enabled {
                    for source in &mut self.sources {
                        source.set_looping_enabled(true);
                    }
                }
                self.sources[base].set_looping_enabled(false);
                tracing::debug!(base, "Selected base source");
                self.sources[base].duration_us()
            }
            MixingType::Sequential => {
                for source in &mut self.sources {
                    source.set_looping_enabled(false);
                }
                self.sources.iter().map(|s| s.duration_us()).sum()
            }
        }
    }

    /// Pinned values win; otherwise the largest value any source advertises,
    /// falling back to the defaults.
    fn negotiate_format(&self) -> OutputFormat {
        let sources = &self.sources;
        OutputFormat {
            sample_rate: pinned_or_max(self.config.sample_rate, sources, |s| s.sample_rate())
                .unwrap_or(DEFAULT_SAMPLE_RATE),
            bit_rate: pinned_or_max(self.config.bit_rate, sources, |s| s.bit_rate())
                .unwrap_or(DEFAULT_BIT_RATE),
            channel_count: pinned_or_max(self.config.channel_count, sources, |s| {
                s.channel_count()
            })
            .unwrap_or(DEFAULT_CHANNEL_COUNT),
        }
    }

    /// Runs the pump loop on the calling thread until the output is complete
    /// or the run is cancelled through [`cancellation_token`](Self::cancellation_token).
    #[instrument(level = "debug", skip(self), err)]
    pub fn process_sync(&mut self) -> Result<()> {
        let mut pipeline = self.take_pipeline()?;
        self.processing.store(true, Ordering::Relaxed);
        self.state = MixerState::Processing;

        let result = drive(&mut pipeline, &self.cancel);

        self.processing.store(false, Ordering::Relaxed);
        self.state = MixerState::Done;
        result
    }

    /// Runs the pump loop on a blocking worker of the current Tokio runtime.
    #[instrument(level = "debug", skip(self), err)]
    pub fn process_async(&mut self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| MixerError::InvalidState("asynchronous processing requires a Tokio runtime"))?;
        let mut pipeline = self.take_pipeline()?;

        let cancel = self.cancel.child_token();
        let processing = self.processing.clone();
        processing.store(true, Ordering::Relaxed);

        let task = handle.spawn_blocking(move || {
            tracing::trace!("Mixing task started");
            let result = drive(&mut pipeline, &cancel);
            processing.store(false, Ordering::Relaxed);
            tracing::trace!("Mixing task completed");
            result
        });

        self.task = Some(task);
        self.state = MixerState::Processing;
        Ok(())
    }

    /// Waits for an asynchronous run to finish on its own and returns its result.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Err(MixerError::InvalidState("mixer is not processing asynchronously"));
        };
        let result = task
            .await
            .map_err(|err| MixerError::Other(anyhow::Error::new(err).context("Mixing task failed")));
        self.state = MixerState::Done;
        result?
    }

    /// Requests early termination and waits for an asynchronous worker to exit.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop(&mut self) {
        tracing::debug!("Stopping mixer");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::debug!(?err, "Mixing task ended with an error"),
                Err(err) => tracing::warn!(?err, "Mixing task failed"),
            }
        }
        if matches!(self.state, MixerState::Started | MixerState::Processing) {
            self.state = MixerState::Done;
        }
    }

    /// Stops processing and releases every source, the encoder and an owned
    /// container writer.
    #[instrument(level = "debug", skip(self))]
    pub async fn release(&mut self) {
        if self.state == MixerState::Released {
            return;
        }
        self.stop().await;
        self.release_resources();
        self.state = MixerState::Released;
        tracing::info!("Mixer released");
    }

    fn release_resources(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.release();
        }
        for source in &mut self.sources {
            source.release();
        }
        self.sources.clear();
        // still held only if the mixer was never started
        if let Some(mut encoder) = self.encoder.take() {
            encoder.release();
            if self.owns_muxer {
                self.muxer.lock().release();
            }
        }
    }

    fn take_pipeline(&mut self) -> Result<Pipeline> {
        match self.state {
            MixerState::Started => self
                .pipeline
                .take()
                .ok_or(MixerError::InvalidState("mixer has no pipeline to process")),
            MixerState::Idle => Err(MixerError::InvalidState("mixer has not been started")),
            _ => Err(MixerError::InvalidState("mixer has already processed")),
        }
    }

    fn ensure_idle(&self, msg: &'static str) -> Result<()> {
        if self.state == MixerState::Idle {
            Ok(())
        } else {
            Err(MixerError::InvalidState(msg))
        }
    }

    /// Token cancelling the running pump loop; lets another thread stop a
    /// [`process_sync`](Self::process_sync) run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> MixerState {
        self.state
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }

    pub fn mixing_type(&self) -> MixingType {
        self.config.mixing_type
    }

    pub fn set_mixing_type(&mut self, mixing_type: MixingType) -> Result<()> {
        self.ensure_idle("mixing type is fixed once started")?;
        self.config.mixing_type = mixing_type;
        Ok(())
    }

    pub fn is_looping_enabled(&self) -> bool {
        self.config.looping_enabled
    }

    /// Loops every source shorter than the output in parallel mixing.
    /// Sequential mixing never loops.
    pub fn set_looping_enabled(&mut self, enabled: bool) -> Result<()> {
        self.ensure_idle("looping is fixed once started")?;
        self.config.looping_enabled = enabled;
        Ok(())
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> f64 {
        self.progress.get()
    }

    /// Negotiated sample rate once started, the pinned one before.
    pub fn output_sample_rate(&self) -> Option<u32> {
        self.format
            .map(|f| f.sample_rate)
            .or(self.config.sample_rate)
    }

    pub fn output_bit_rate(&self) -> Option<u32> {
        self.format.map(|f| f.bit_rate).or(self.config.bit_rate)
    }

    pub fn output_channel_count(&self) -> Option<u16> {
        self.format
            .map(|f| f.channel_count)
            .or(self.config.channel_count)
    }

    pub fn output_duration_us(&self) -> u64 {
        self.output_duration_us
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        self.ensure_idle("output format is fixed once started")?;
        self.config.sample_rate = Some(sample_rate).filter(|&r| r > 0);
        Ok(())
    }

    pub fn set_bit_rate(&mut self, bit_rate: u32) -> Result<()> {
        self.ensure_idle("output format is fixed once started")?;
        self.config.bit_rate = Some(bit_rate).filter(|&r| r > 0);
        Ok(())
    }

    pub fn set_channel_count(&mut self, channel_count: u16) -> Result<()> {
        self.ensure_idle("output format is fixed once started")?;
        self.config.channel_count = Some(channel_count).filter(|&c| c > 0);
        Ok(())
    }

    pub fn set_listener(&mut self, listener: impl ProgressListener + 'static) -> Result<()> {
        let listener: Box<dyn ProgressListener> = Box::new(listener);
        match (self.state, self.pipeline.as_mut()) {
            (MixerState::Idle, _) => self.listener = Some(listener),
            (MixerState::Started, Some(pipeline)) => pipeline.set_listener(Some(listener)),
            _ => {
                return Err(MixerError::InvalidState(
                    "listener cannot be replaced while processing",
                ));
            }
        }
        Ok(())
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        // a detached worker observes the cancellation and releases its pipeline
        self.cancel.cancel();
        self.release_resources();
    }
}

fn drive(pipeline: &mut Pipeline, cancel: &CancellationToken) -> Result<()> {
    let result = pipeline.run(cancel);
    pipeline.finish(&result);
    result.map(|_| ())
}

fn pinned_or_max<T: Copy + Ord + Default>(
    pinned: Option<T>,
    sources: &[Box<dyn AudioSource>],
    advertised: impl Fn(&dyn AudioSource) -> Option<T>,
) -> Option<T> {
    pinned.filter(|&v| v > T::default()).or_else(|| {
        sources
            .iter()
            .filter_map(|s| advertised(s.as_ref()))
            .filter(|&v| v > T::default())
            .max()
    })
}
