use crate::dsp::convert_channels;
use crate::error::{MixerError, Result};
use crate::resample::{PooledResampler, ResamplerCache};

/// Converts native-format decoder output into the engine's target format.
///
/// Channel conversion always happens before rate conversion so the resampler
/// only ever sees the target channel count. The channel scratch buffer and the
/// resampler are kept across calls; [`flush`](Self::flush) ends the stream.
pub struct BufferNormalizer {
    target_rate: u32,
    target_channels: u16,
    cache: ResamplerCache,
    resampler: Option<PooledResampler>,
    scratch: Vec<i16>,
}

impl BufferNormalizer {
    pub fn new(target_rate: u32, target_channels: u16, cache: ResamplerCache) -> Self {
        Self {
            target_rate,
            target_channels,
            cache,
            resampler: None,
            scratch: Vec::new(),
        }
    }

    /// Replaces the contents of `out` with `input` converted to the target format.
    pub fn normalize(
        &mut self,
        input: &[i16],
        source_rate: u32,
        source_channels: u16,
        out: &mut Vec<i16>,
    ) -> Result<()> {
        if source_rate == 0 || source_channels == 0 {
            return Err(MixerError::Decode(format!(
                "invalid source format: {source_rate} Hz, {source_channels} channels"
            )));
        }
        out.clear();

        let resampler = match &mut self.resampler {
            Some(resampler) if resampler.key().input_rate == source_rate => resampler,
            slot => {
                if let Some(mut previous) = slot.take() {
                    previous.flush(out)?;
                    self.cache.recycle(previous);
                }
                slot.insert(
                    self.cache
                        .acquire(source_rate, self.target_rate, self.target_channels)?,
                )
            }
        };

        if source_channels == self.target_channels {
            resampler.resample(input, out)?;
        } else {
            self.scratch.clear();
            convert_channels(
                input,
                source_channels as usize,
                self.target_channels as usize,
                &mut self.scratch,
            );
            resampler.resample(&self.scratch, out)?;
        }
        Ok(())
    }

    /// Replaces the contents of `out` with the output the resampler still holds
    /// back at the end of the stream.
    pub fn flush(&mut self, out: &mut Vec<i16>) -> Result<()> {
        out.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.flush(out)?;
        }
        Ok(())
    }

    /// Returns the held resampler to the shared cache.
    pub fn release(&mut self) {
        if let Some(resampler) = self.resampler.take() {
            self.cache.recycle(resampler);
        }
    }
}

impl Drop for BufferNormalizer {
    fn drop(&mut self) {
        self.release();
    }
}
