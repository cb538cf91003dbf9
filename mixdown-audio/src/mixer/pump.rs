use crate::codec::{
    AAC_PROFILE_LC, AudioEncoder, ENCODER_FRAME_SAMPLES, EncoderConfig, EncoderOutput, SharedMuxer,
};
use crate::dsp::samples_to_us;
use crate::error::{MixerError, Result};
use crate::listener::ProgressListener;
use crate::mixer::Progress;
use crate::mixer::mix::SourceMix;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed,
    Cancelled,
}

/// Negotiated output format of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OutputFormat {
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub channel_count: u16,
}

/// Everything one mixing session pumps through: sources, encoder and container.
pub(crate) struct Pipeline {
    mix: SourceMix,
    encoder: Box<dyn AudioEncoder>,
    muxer: SharedMuxer,
    owns_muxer: bool,
    format: OutputFormat,
    max_input_size: usize,
    output_duration_us: u64,
    listener: Option<Box<dyn ProgressListener>>,
    progress: Progress,

    track_index: Option<usize>,
    samples_queued: u64,
    input_done: bool,
    mixing_done: bool,
    last_written_pts_us: u64,
    /// Estimated end of the last written unit, used for progress and as the
    /// substitute timestamp for units stamped in the past.
    estimated_audio_time_us: u64,
    released: bool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        mix: SourceMix,
        encoder: Box<dyn AudioEncoder>,
        muxer: SharedMuxer,
        owns_muxer: bool,
        format: OutputFormat,
        max_input_size: usize,
        output_duration_us: u64,
        progress: Progress,
    ) -> Self {
        Self {
            mix,
            encoder,
            muxer,
            owns_muxer,
            format,
            max_input_size,
            output_duration_us,
            listener: None,
            progress,
            track_index: None,
            samples_queued: 0,
            input_done: false,
            mixing_done: false,
            last_written_pts_us: 0,
            estimated_audio_time_us: 0,
            released: false,
        }
    }

    pub(crate) fn set_listener(&mut self, listener: Option<Box<dyn ProgressListener>>) {
        self.listener = listener;
    }

    /// Starts the sources, configures the encoder and pumps until the encoder
    /// has announced its format and the track is registered with the container.
    /// An owned container is started afterwards.
    #[instrument(level = "debug", skip(self, cancel), err)]
    pub(crate) fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.mix
            .start(self.format.sample_rate, self.format.channel_count)?;

        let config = EncoderConfig {
            mime: self.encoder.mime_type().to_string(),
            profile: AAC_PROFILE_LC,
            sample_rate: self.format.sample_rate,
            bit_rate: self.format.bit_rate,
            channel_count: self.format.channel_count,
            max_input_size: self.max_input_size,
        };
        tracing::debug!(?config, "Configuring encoder");
        self.encoder.configure(&config)?;

        while self.track_index.is_none() {
            if cancel.is_cancelled() {
                return Err(MixerError::InvalidState(
                    "mixer stopped before the output track was registered",
                ));
            }
            if self.mixing_done {
                return Err(MixerError::io(
                    "encoder finished without announcing its output format",
                ));
            }
            self.step()?;
        }

        if self.owns_muxer {
            self.muxer.lock().start()?;
        }
        Ok(())
    }

    /// Pumps until the encoder signals end of stream or `cancel` fires.
    pub(crate) fn run(&mut self, cancel: &CancellationToken) -> Result<RunOutcome> {
        while !self.mixing_done {
            if cancel.is_cancelled() {
                tracing::debug!(progress = self.progress.get(), "Mixing cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            self.step()?;
        }
        Ok(RunOutcome::Completed)
    }

    fn step(&mut self) -> Result<()> {
        if !self.input_done {
            self.feed_input()?;
        }
        self.drain_output()?;
        self.update_progress();
        Ok(())
    }

    fn feed_input(&mut self) -> Result<()> {
        let Some(index) = self.encoder.dequeue_input_buffer() else {
            return Ok(());
        };
        let pts = samples_to_us(
            self.samples_queued,
            self.format.sample_rate,
            self.format.channel_count,
        );

        if !self.mix.has_remaining() {
            tracing::debug!(pts, "Sources exhausted, signalling end of input");
            self.encoder.queue_input_buffer(index, 0, pts, true)?;
            self.input_done = true;
            return Ok(());
        }

        let slot = self.encoder.input_buffer(index);
        let written = self.mix.fill(slot)?;
        self.encoder.queue_input_buffer(index, written, pts, false)?;
        self.samples_queued += written as u64;
        Ok(())
    }

    fn drain_output(&mut self) -> Result<()> {
        match self.encoder.dequeue_output_buffer()? {
            EncoderOutput::TryAgainLater => {}
            EncoderOutput::FormatChanged(format) => {
                if self.track_index.is_some() {
                    tracing::warn!(?format, "Ignoring repeated encoder format change");
                } else {
                    let index = self.muxer.lock().add_track(&format)?;
                    tracing::debug!(?format, index, "Registered output track");
                    self.track_index = Some(index);
                }
            }
            EncoderOutput::Buffer { index, mut info } => {
                if info.end_of_stream {
                    self.mixing_done = true;
                }
                if info.size > 0 {
                    let Some(track_index) = self.track_index else {
                        return Err(MixerError::InvalidState(
                            "encoder produced data before announcing its format",
                        ));
                    };

                    // some encoders stamp their final unit with 0
                    if info.presentation_time_us < self.last_written_pts_us {
                        tracing::trace!(
                            raw = info.presentation_time_us,
                            substitute = self.estimated_audio_time_us,
                            "Correcting regressing timestamp"
                        );
                        info.presentation_time_us = self.estimated_audio_time_us;
                    }

                    let data = self.encoder.output_buffer(index);
                    let size = info.size.min(data.len());
                    self.muxer
                        .lock()
                        .write_sample(track_index, &data[..size], &info)?;

                    self.last_written_pts_us = info.presentation_time_us;
                    self.estimated_audio_time_us =
                        self.last_written_pts_us + self.approx_presentation_time_diff_us();
                    tracing::trace!(pts = info.presentation_time_us, size, "Wrote encoded unit");
                }
                self.encoder.release_output_buffer(index);
            }
        }
        Ok(())
    }

    /// Approximate duration of one encoded unit of [`ENCODER_FRAME_SAMPLES`] frames.
    fn approx_presentation_time_diff_us(&self) -> u64 {
        ENCODER_FRAME_SAMPLES as u64 * 1_000_000 / self.format.sample_rate.max(1) as u64
    }

    fn update_progress(&mut self) {
        if self.output_duration_us == 0 {
            return;
        }
        let progress =
            (self.estimated_audio_time_us as f64 / self.output_duration_us as f64).min(1.0);
        self.report_progress(progress);
    }

    fn report_progress(&mut self, progress: f64) {
        if progress <= self.progress.get() {
            return;
        }
        self.progress.set(progress);
        if let Some(listener) = &mut self.listener {
            listener.on_progress(progress);
        }
    }

    /// Releases resources, reports the run's outcome and signals the end to the
    /// listener. Progress reaches 1.0 only when the run completed.
    pub(crate) fn finish(&mut self, result: &Result<RunOutcome>) {
        self.release();
        match result {
            Ok(RunOutcome::Completed) => {
                tracing::info!(duration_us = self.output_duration_us, "Mixing completed");
                self.report_progress(1.0);
            }
            Ok(RunOutcome::Cancelled) => {
                tracing::info!(progress = self.progress.get(), "Mixing stopped early");
            }
            Err(err) => {
                tracing::error!(?err, "Mixing failed");
                if let Some(listener) = &mut self.listener {
                    listener.on_error(err);
                }
            }
        }
        if let Some(listener) = &mut self.listener {
            listener.on_end();
        }
    }

    /// Best-effort release of every source, the encoder and an owned container.
    /// An external container is left to its owner.
    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::debug!("Releasing mixing pipeline");

        self.mix.release();

        if let Err(err) = self.encoder.stop() {
            tracing::warn!(?err, "Failed to stop encoder");
        }
        self.encoder.release();

        if self.owns_muxer {
            let mut muxer = self.muxer.lock();
            // fails legitimately when the run was stopped mid-stream
            if let Err(err) = muxer.stop() {
                tracing::debug!(?err, "Failed to stop container writer");
            }
            muxer.release();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MIME_AUDIO_RAW, shared_muxer};
    use crate::config::MixingType;
    use crate::listener::MixerEvent;
    use crate::sources::{AudioSource, DecodedSource};
    use crate::test_utils::{EncoderScript, MemoryDecoder, MemoryMuxer, ScriptedEncoder};
    use pretty_assertions::assert_eq;
    use test_log::test;
    use tokio::sync::mpsc;

    const FORMAT: OutputFormat = OutputFormat {
        sample_rate: 1000,
        bit_rate: 16_000,
        channel_count: 1,
    };

    fn pipeline(
        duration_us: u64,
        script: EncoderScript,
        muxer: &MemoryMuxer,
        owns_muxer: bool,
    ) -> Pipeline {
        let source: Box<dyn AudioSource> = Box::new(DecodedSource::new(MemoryDecoder::constant(
            1000,
            1,
            duration_us,
            42,
        )));
        Pipeline::new(
            SourceMix::new(vec![source], MixingType::Parallel),
            Box::new(ScriptedEncoder::new(script)),
            shared_muxer(muxer.clone()),
            owns_muxer,
            FORMAT,
            2048,
            duration_us,
            Progress::default(),
        )
    }

    #[test]
    fn open_registers_track_before_writing() -> anyhow::Result<()> {
        let muxer = MemoryMuxer::new();
        let mut pipeline = pipeline(5_000_000, EncoderScript::default(), &muxer, true);
        pipeline.open(&CancellationToken::new())?;

        let log = muxer.log();
        let log = log.lock();
        assert_eq!(log.tracks.len(), 1);
        assert_eq!(log.tracks[0].mime, MIME_AUDIO_RAW);
        assert_eq!(log.tracks[0].sample_rate, 1000);
        assert!(log.started);
        assert!(log.samples.is_empty());
        Ok(())
    }

    #[test]
    fn external_muxer_is_not_started_or_stopped() -> anyhow::Result<()> {
        let muxer = MemoryMuxer::new();
        muxer.log().lock().started = true;
        let mut pipeline = pipeline(3_000_000, EncoderScript::default(), &muxer, false);
        let cancel = CancellationToken::new();
        pipeline.open(&cancel)?;
        let result = pipeline.run(&cancel);
        pipeline.finish(&result);

        let log = muxer.log();
        let log = log.lock();
        assert!(!log.stopped);
        assert!(!log.released);
        assert_eq!(log.pcm().len(), 3000);
        Ok(())
    }

    #[test]
    fn corrects_zero_timestamp_on_final_unit() -> anyhow::Result<()> {
        let muxer = MemoryMuxer::new();
        let script = EncoderScript {
            zero_final_timestamp: true,
            ..EncoderScript::default()
        };
        let mut pipeline = pipeline(5_000_000, script, &muxer, true);
        let cancel = CancellationToken::new();
        pipeline.open(&cancel)?;
        assert_eq!(pipeline.run(&cancel)?, RunOutcome::Completed);

        let timestamps = muxer.log().lock().timestamps();
        // 5000 samples in slots of 1024
        assert_eq!(
            timestamps,
            vec![0, 1_024_000, 2_048_000, 3_072_000, 4_096_000]
        );
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        Ok(())
    }

    #[test]
    fn stalled_encoder_input_is_retried() -> anyhow::Result<()> {
        let muxer = MemoryMuxer::new();
        let script = EncoderScript {
            stalled_inputs: 5,
            ..EncoderScript::default()
        };
        let mut pipeline = pipeline(2_000_000, script, &muxer, true);
        let cancel = CancellationToken::new();
        pipeline.open(&cancel)?;
        assert_eq!(pipeline.run(&cancel)?, RunOutcome::Completed);
        assert_eq!(muxer.log().lock().pcm(), vec![42; 2000]);
        Ok(())
    }

    #[test]
    fn progress_is_monotonic_and_completes() -> anyhow::Result<()> {
        let muxer = MemoryMuxer::new();
        let mut pipeline = pipeline(10_000_000, EncoderScript::default(), &muxer, true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline.set_listener(Some(Box::new(tx)));

        let cancel = CancellationToken::new();
        pipeline.open(&cancel)?;
        let result = pipeline.run(&cancel);
        pipeline.finish(&result);

        let mut progress = Vec::new();
        let mut ended = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                MixerEvent::Progress(p) => progress.push(p),
                MixerEvent::End => ended += 1,
                MixerEvent::Error(err) => anyhow::bail!("unexpected error: {err}"),
            }
        }
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(progress.last().copied(), Some(1.0));
        assert_eq!(ended, 1);
        Ok(())
    }

    #[test]
    fn cancelled_run_swallows_container_stop_failure() -> anyhow::Result<()> {
        let muxer = MemoryMuxer::new();
        muxer.log().lock().fail_stop = true;
        let mut pipeline = pipeline(10_000_000, EncoderScript::default(), &muxer, true);
        let cancel = CancellationToken::new();
        pipeline.open(&cancel)?;

        cancel.cancel();
        let result = pipeline.run(&cancel);
        assert!(matches!(result, Ok(RunOutcome::Cancelled)));
        pipeline.finish(&result);

        let log = muxer.log();
        let log = log.lock();
        assert!(!log.stopped);
        assert!(log.released);
        assert!(pipeline.progress.get() < 1.0);
        Ok(())
    }

    #[test]
    fn encoder_configuration_failure_surfaces() {
        let muxer = MemoryMuxer::new();
        let script = EncoderScript {
            fail_configure: true,
            ..EncoderScript::default()
        };
        let mut pipeline = pipeline(1_000_000, script, &muxer, true);
        assert!(matches!(
            pipeline.open(&CancellationToken::new()),
            Err(MixerError::Io(_))
        ));
        assert!(muxer.log().lock().tracks.is_empty());
    }
}
