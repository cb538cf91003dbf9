//! Sample-rate conversion of interleaved PCM16 buffers.
//!
//! Kernels are stateful (they carry fractional positions and filter history
//! across calls), so the [`ResamplerCache`] pools idle instances per
//! `(input_rate, output_rate, channels)` instead of handing one instance to
//! several streams at once.

use crate::dsp::LinearResampler;
use crate::error::Result;
use parking_lot::Mutex;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const SINC_CHUNK_FRAMES: usize = 1024;

/// Converts an interleaved PCM16 stream from one fixed sample rate to another.
pub trait Resample: Send {
    /// Consumes all of `input`, appends the converted samples to `output` and
    /// returns how many samples were appended.
    fn resample(&mut self, input: &[i16], output: &mut Vec<i16>) -> Result<usize>;

    /// Ends the stream: appends whatever output is still held back and resets
    /// the kernel for a new stream. Returns how many samples were appended.
    fn flush(&mut self, output: &mut Vec<i16>) -> Result<usize>;

    /// Drops any carried stream state so the kernel can serve a new stream.
    fn reset(&mut self);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerQuality {
    /// Linear interpolation, output length exactly tracks the rate ratio.
    #[default]
    Linear,
    /// Windowed sinc interpolation; buffers input in fixed chunks until flushed.
    Sinc,
}

#[derive(Debug, Default)]
pub struct Passthrough;

impl Resample for Passthrough {
    fn resample(&mut self, input: &[i16], output: &mut Vec<i16>) -> Result<usize> {
        output.extend_from_slice(input);
        Ok(input.len())
    }

    fn flush(&mut self, _output: &mut Vec<i16>) -> Result<usize> {
        Ok(0)
    }

    fn reset(&mut self) {}
}

impl Resample for LinearResampler {
    fn resample(&mut self, input: &[i16], output: &mut Vec<i16>) -> Result<usize> {
        Ok(self.process(input, output))
    }

    fn flush(&mut self, output: &mut Vec<i16>) -> Result<usize> {
        Ok(LinearResampler::flush(self, output))
    }

    fn reset(&mut self) {
        LinearResampler::reset(self);
    }
}

pub struct SincResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    ratio: f64,
    /// deinterleaved input waiting for a full chunk
    pending: Vec<Vec<f32>>,
    /// leading output frames still owed to the filter delay
    delay: usize,
    frames_in: u64,
    frames_out: u64,
}

impl SincResampler {
    pub fn new(from_hz: u32, to_hz: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;
        let ratio = to_hz as f64 / from_hz as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, SINC_CHUNK_FRAMES, channels)?;

        Ok(Self {
            delay: inner.output_delay(),
            inner,
            channels,
            ratio,
            pending: vec![Vec::with_capacity(SINC_CHUNK_FRAMES * 2); channels],
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Output frames the input seen so far amounts to.
    fn expected_frames(&self) -> u64 {
        (self.frames_in as f64 * self.ratio).round() as u64
    }

    /// Runs one chunk of `need` pending frames through the filter and appends
    /// at most `limit - frames_out` frames past the filter delay.
    fn process_chunk(&mut self, need: usize, limit: u64, output: &mut Vec<i16>) -> Result<()> {
        let chunk: Vec<&[f32]> = self.pending.iter().map(|ch| &ch[..need]).collect();
        let resampled = self.inner.process(&chunk, None)?;
        for ch in self.pending.iter_mut() {
            ch.drain(..need);
        }

        let frames = resampled[0].len();
        let skip = self.delay.min(frames);
        self.delay -= skip;
        let keep = ((frames - skip) as u64).min(limit.saturating_sub(self.frames_out)) as usize;

        output.reserve(keep * self.channels);
        for i in skip..skip + keep {
            for channel in &resampled {
                let value = (channel[i] * 32768.0).round();
                output.push(value.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            }
        }
        self.frames_out += keep as u64;
        Ok(())
    }
}

impl Resample for SincResampler {
    fn resample(&mut self, input: &[i16], output: &mut Vec<i16>) -> Result<usize> {
        for frame in input.chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.pending[ch].push(sample as f32 / 32768.0);
            }
        }
        self.frames_in += (input.len() / self.channels) as u64;

        let start = output.len();
        loop {
            let need = self.inner.input_frames_next();
            if self.pending[0].len() < need {
                break;
            }
            self.process_chunk(need, u64::MAX, output)?;
        }

        Ok(output.len() - start)
    }

    fn flush(&mut self, output: &mut Vec<i16>) -> Result<usize> {
        let start = output.len();
        let expected = self.expected_frames();
        // zero padding pushes the buffered tail and the filter delay out
        while self.frames_out < expected {
            let need = self.inner.input_frames_next();
            for ch in self.pending.iter_mut() {
                ch.resize(need.max(ch.len()), 0.0);
            }
            self.process_chunk(need, expected, output)?;
        }
        tracing::trace!(frames = self.frames_out, "Flushed sinc resampler");

        self.reset();
        Ok(output.len() - start)
    }

    fn reset(&mut self) {
        self.inner.reset();
        for ch in self.pending.iter_mut() {
            ch.clear();
        }
        self.delay = self.inner.output_delay();
        self.frames_in = 0;
        self.frames_out = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResamplerKey {
    pub input_rate: u32,
    pub output_rate: u32,
    pub channels: u16,
}

/// Kernel checked out of a [`ResamplerCache`]; hand it back with
/// [`ResamplerCache::recycle`] once the stream it served is finished.
pub struct PooledResampler {
    key: ResamplerKey,
    kernel: Box<dyn Resample>,
}

impl PooledResampler {
    pub fn key(&self) -> ResamplerKey {
        self.key
    }

    pub fn resample(&mut self, input: &[i16], output: &mut Vec<i16>) -> Result<usize> {
        self.kernel.resample(input, output)
    }

    pub fn flush(&mut self, output: &mut Vec<i16>) -> Result<usize> {
        self.kernel.flush(output)
    }
}

/// Pool of resampling kernels keyed by `(input_rate, output_rate, channels)`.
///
/// Cloning is cheap and yields a handle to the same pool. There is no eviction.
#[derive(Clone, Default)]
pub struct ResamplerCache {
    quality: ResamplerQuality,
    idle: Arc<Mutex<HashMap<ResamplerKey, Vec<Box<dyn Resample>>>>>,
}

impl ResamplerCache {
    pub fn new(quality: ResamplerQuality) -> Self {
        Self {
            quality,
            idle: Arc::default(),
        }
    }

    pub fn quality(&self) -> ResamplerQuality {
        self.quality
    }

    /// Returns an idle kernel for the key, constructing one if none is pooled.
    /// Equal rates always yield a passthrough kernel.
    pub fn acquire(
        &self,
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<PooledResampler> {
        let key = ResamplerKey {
            input_rate,
            output_rate,
            channels,
        };

        if input_rate == output_rate {
            return Ok(PooledResampler {
                key,
                kernel: Box::new(Passthrough),
            });
        }

        if let Some(kernel) = self.idle.lock().get_mut(&key).and_then(Vec::pop) {
            tracing::trace!(?key, "Reusing pooled resampler");
            return Ok(PooledResampler { key, kernel });
        }

        tracing::debug!(?key, quality = ?self.quality, "Creating resampler");
        let kernel: Box<dyn Resample> = match self.quality {
            ResamplerQuality::Linear => {
                Box::new(LinearResampler::new(input_rate, output_rate, channels))
            }
            ResamplerQuality::Sinc => {
                Box::new(SincResampler::new(input_rate, output_rate, channels)?)
            }
        };
        Ok(PooledResampler { key, kernel })
    }

    pub fn recycle(&self, mut resampler: PooledResampler) {
        if resampler.key.input_rate == resampler.key.output_rate {
            return;
        }
        resampler.kernel.reset();
        self.idle
            .lock()
            .entry(resampler.key)
            .or_default()
            .push(resampler.kernel);
    }

    /// Number of idle kernels pooled for the key.
    pub fn idle_count(&self, input_rate: u32, output_rate: u32, channels: u16) -> usize {
        self.idle
            .lock()
            .get(&ResamplerKey {
                input_rate,
                output_rate,
                channels,
            })
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn equal_rates_pass_through_unchanged() -> anyhow::Result<()> {
        let cache = ResamplerCache::new(ResamplerQuality::Sinc);
        let mut resampler = cache.acquire(44_100, 44_100, 2)?;

        let input: Vec<i16> = vec![i16::MIN, -1, 0, 1, i16::MAX, 12_345];
        let mut output = vec![42];
        let produced = resampler.resample(&input, &mut output)?;

        assert_eq!(produced, input.len());
        assert_eq!(&output[1..], &input[..]);
        Ok(())
    }

    #[test]
    fn recycled_kernels_are_reused() -> anyhow::Result<()> {
        let cache = ResamplerCache::default();
        let resampler = cache.acquire(48_000, 44_100, 2)?;
        assert_eq!(cache.idle_count(48_000, 44_100, 2), 0);

        cache.recycle(resampler);
        assert_eq!(cache.idle_count(48_000, 44_100, 2), 1);
        assert_eq!(cache.idle_count(44_100, 48_000, 2), 0);

        let again = cache.acquire(48_000, 44_100, 2)?;
        assert_eq!(again.key().output_rate, 44_100);
        assert_eq!(cache.idle_count(48_000, 44_100, 2), 0);
        Ok(())
    }

    #[test]
    fn clones_share_the_pool() -> anyhow::Result<()> {
        let cache = ResamplerCache::default();
        let shared = cache.clone();
        shared.recycle(cache.acquire(8_000, 16_000, 1)?);
        assert_eq!(cache.idle_count(8_000, 16_000, 1), 1);
        Ok(())
    }

    #[test]
    fn sinc_flush_completes_the_rate_ratio() -> anyhow::Result<()> {
        let cache = ResamplerCache::new(ResamplerQuality::Sinc);
        let mut resampler = cache.acquire(48_000, 24_000, 1)?;

        let input: Vec<i16> = (0..48_000)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        let mut output = Vec::new();
        for chunk in input.chunks(4410) {
            resampler.resample(chunk, &mut output)?;
        }
        assert!(output.len() < 24_000);

        resampler.flush(&mut output)?;
        assert_eq!(output.len(), 24_000);
        Ok(())
    }

    #[test]
    fn sinc_short_stream_is_not_lost() -> anyhow::Result<()> {
        let cache = ResamplerCache::new(ResamplerQuality::Sinc);
        let mut resampler = cache.acquire(48_000, 44_100, 2)?;

        let mut output = Vec::new();
        resampler.resample(&[1000; 2 * 480], &mut output)?;
        assert!(output.is_empty());

        resampler.flush(&mut output)?;
        assert_eq!(output.len(), 2 * 441);
        // the filter delay is skipped, so the signal is not shifted late
        let middle = &output[64..output.len() - 64];
        assert!(middle.iter().all(|&s| (s - 1000).abs() < 50));
        Ok(())
    }

    #[test]
    fn sinc_kernel_serves_a_new_stream_after_flush() -> anyhow::Result<()> {
        let cache = ResamplerCache::new(ResamplerQuality::Sinc);
        let mut resampler = cache.acquire(22_050, 44_100, 1)?;

        for _ in 0..2 {
            let mut output = Vec::new();
            resampler.resample(&[0; 3000], &mut output)?;
            resampler.flush(&mut output)?;
            assert_eq!(output.len(), 6000);
        }
        Ok(())
    }
}
