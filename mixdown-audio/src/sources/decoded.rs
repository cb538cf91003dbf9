use crate::codec::AudioDecoder;
use crate::dsp::us_to_samples;
use crate::error::{MixerError, Result};
use crate::normalize::BufferNormalizer;
use crate::resample::ResamplerCache;
use crate::sources::AudioSource;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    Started,
    Exhausted,
    Released,
}

/// Source backed by a decoder. Emits `start_offset_us` of silence, then the
/// decoder's trim window converted to the engine's output format.
pub struct DecodedSource {
    decoder: Box<dyn AudioDecoder>,
    cache: ResamplerCache,
    normalizer: Option<BufferNormalizer>,
    start_offset_us: u64,
    volume: f32,
    looping: bool,
    state: State,
    silence_remaining: u64,
    /// The decoder ran dry and the normalizer has been flushed.
    input_ended: bool,
    buffer: Vec<i16>,
    pos: usize,
}

impl DecodedSource {
    pub fn new(decoder: impl AudioDecoder + 'static) -> Self {
        Self::from_boxed(Box::new(decoder))
    }

    pub fn from_boxed(decoder: Box<dyn AudioDecoder>) -> Self {
        Self {
            decoder,
            cache: ResamplerCache::default(),
            normalizer: None,
            start_offset_us: 0,
            volume: 1.0,
            looping: false,
            state: State::Unstarted,
            silence_remaining: 0,
            input_ended: false,
            buffer: Vec::new(),
            pos: 0,
        }
    }

    pub fn with_start_offset_us(mut self, offset_us: u64) -> Self {
        self.start_offset_us = offset_us;
        self
    }

    pub fn with_trim(mut self, start_time_us: u64, end_time_us: Option<u64>) -> Self {
        self.set_start_time_us(start_time_us);
        if let Some(end) = end_time_us {
            self.set_end_time_us(end);
        }
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.set_volume(volume);
        self
    }

    pub fn start_offset_us(&self) -> u64 {
        self.start_offset_us
    }

    pub fn set_start_offset_us(&mut self, offset_us: u64) {
        self.start_offset_us = offset_us;
    }

    pub fn set_start_time_us(&mut self, time_us: u64) {
        self.decoder.set_start_time_us(time_us);
    }

    pub fn set_end_time_us(&mut self, time_us: u64) {
        self.decoder.set_end_time_us(time_us);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
    }

    /// Refills the normalized buffer from the decoder until it holds samples
    /// or the decoder runs dry. Once dry, the samples the resampler still holds
    /// are drained before the source is exhausted.
    fn refill(&mut self) -> Result<()> {
        let Some(normalizer) = self.normalizer.as_mut() else {
            return Err(MixerError::InvalidState("decoded source has not been started"));
        };

        while self.pos >= self.buffer.len() {
            self.pos = 0;
            if self.input_ended {
                self.buffer.clear();
                self.state = State::Exhausted;
                tracing::debug!("Decoded source exhausted");
                return Ok(());
            }

            let rate = self.decoder.sample_rate();
            let channels = self.decoder.channel_count();
            let Some(frame) = self.decoder.decode()? else {
                normalizer.flush(&mut self.buffer)?;
                self.input_ended = true;
                continue;
            };

            let index = frame.index;
            normalizer.normalize(frame.samples, rate, channels, &mut self.buffer)?;
            self.decoder.release_output_buffer(index);
        }
        Ok(())
    }
}

impl AudioSource for DecodedSource {
    fn duration_us(&self) -> u64 {
        self.end_time_us().saturating_sub(self.start_time_us()) + self.start_offset_us
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.decoder.sample_rate())
    }

    fn bit_rate(&self) -> Option<u32> {
        Some(self.decoder.bit_rate())
    }

    fn channel_count(&self) -> Option<u16> {
        Some(self.decoder.channel_count())
    }

    fn is_looping_enabled(&self) -> bool {
        self.looping
    }

    fn set_looping_enabled(&mut self, enabled: bool) {
        self.looping = enabled;
        self.decoder.set_looping_enabled(enabled);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn start_time_us(&self) -> u64 {
        self.decoder.start_time_us()
    }

    fn end_time_us(&self) -> u64 {
        self.decoder.end_time_us()
    }

    #[instrument(level = "debug", skip(self), err)]
    fn start(&mut self, sample_rate: u32, channel_count: u16) -> Result<()> {
        if self.state != State::Unstarted {
            return Err(MixerError::InvalidState("decoded source already started"));
        }

        self.decoder.start()?;
        self.normalizer = Some(BufferNormalizer::new(
            sample_rate,
            channel_count,
            self.cache.clone(),
        ));
        self.silence_remaining = us_to_samples(self.start_offset_us, sample_rate, channel_count);
        self.state = State::Started;

        // prime the buffer so `has_remaining` is accurate from the start
        if self.silence_remaining == 0 {
            self.refill()?;
        }
        Ok(())
    }

    fn has_remaining(&self) -> bool {
        self.state == State::Started
    }

    fn next(&mut self) -> Result<i16> {
        if self.state != State::Started {
            return Err(MixerError::InvalidState("decoded source has no remaining samples"));
        }

        if self.silence_remaining > 0 {
            self.silence_remaining -= 1;
            if self.silence_remaining == 0 {
                self.refill()?;
            }
            return Ok(0);
        }

        let value = self.buffer[self.pos];
        self.pos += 1;
        self.refill()?;
        Ok(value)
    }

    fn release(&mut self) {
        if self.state == State::Released {
            return;
        }
        if let Some(mut normalizer) = self.normalizer.take() {
            normalizer.release();
        }
        self.buffer = Vec::new();
        if let Err(err) = self.decoder.stop() {
            tracing::warn!(?err, "Failed to stop decoder");
        }
        self.decoder.release();
        self.state = State::Released;
    }

    fn set_resampler_cache(&mut self, cache: ResamplerCache) {
        self.cache = cache;
    }
}
