use crate::dsp::us_to_samples;
use crate::error::{MixerError, Result};
use crate::sources::AudioSource;

/// Emits zero samples for a fixed duration. Has no format preference of its
/// own and takes whatever the engine negotiates.
#[derive(Debug)]
pub struct SilenceSource {
    duration_us: u64,
    remaining: u64,
    started: bool,
    looping: bool,
}

impl SilenceSource {
    pub fn new(duration_us: u64) -> Self {
        Self {
            duration_us,
            remaining: 0,
            started: false,
            looping: false,
        }
    }
}

impl AudioSource for SilenceSource {
    fn duration_us(&self) -> u64 {
        self.duration_us
    }

    fn sample_rate(&self) -> Option<u32> {
        None
    }

    fn bit_rate(&self) -> Option<u32> {
        None
    }

    fn channel_count(&self) -> Option<u16> {
        None
    }

    fn is_looping_enabled(&self) -> bool {
        self.looping
    }

    fn set_looping_enabled(&mut self, enabled: bool) {
        self.looping = enabled;
    }

    fn volume(&self) -> f32 {
        1.0
    }

    fn start_time_us(&self) -> u64 {
        0
    }

    fn end_time_us(&self) -> u64 {
        self.duration_us
    }

    fn start(&mut self, sample_rate: u32, channel_count: u16) -> Result<()> {
        if self.started {
            return Err(MixerError::InvalidState("silence source already started"));
        }
        self.remaining = us_to_samples(self.duration_us, sample_rate, channel_count);
        self.started = true;
        Ok(())
    }

    fn has_remaining(&self) -> bool {
        self.looping || self.remaining > 0
    }

    fn next(&mut self) -> Result<i16> {
        if !self.has_remaining() {
            return Err(MixerError::InvalidState("silence source has no remaining samples"));
        }
        self.remaining = self.remaining.saturating_sub(1);
        Ok(0)
    }

    fn release(&mut self) {
        self.remaining = 0;
        self.looping = false;
    }
}
