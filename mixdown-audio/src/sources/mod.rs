pub mod decoded;
pub mod silence;

use crate::error::Result;
use crate::resample::ResamplerCache;

pub use decoded::DecodedSource;
pub use silence::SilenceSource;

/// Producer of PCM16 samples already normalized to the engine's output format.
///
/// `start` is called exactly once, before any `has_remaining`/`next` call, and
/// fixes the normalization target for the source's lifetime. `next` must only
/// be called while `has_remaining` is true. Volume is reported here but applied
/// by the mixer.
pub trait AudioSource: Send {
    /// Duration the source occupies on the mixed timeline, including any start offset.
    fn duration_us(&self) -> u64;

    /// Native sample rate, or `None` if the source adopts the negotiated one.
    fn sample_rate(&self) -> Option<u32>;

    fn bit_rate(&self) -> Option<u32>;

    fn channel_count(&self) -> Option<u16>;

    fn is_looping_enabled(&self) -> bool;

    fn set_looping_enabled(&mut self, enabled: bool);

    fn volume(&self) -> f32;

    fn start_time_us(&self) -> u64;

    fn end_time_us(&self) -> u64;

    fn start(&mut self, sample_rate: u32, channel_count: u16) -> Result<()>;

    fn has_remaining(&self) -> bool;

    fn next(&mut self) -> Result<i16>;

    fn release(&mut self);

    /// Hands the source the engine's resampler pool before `start`. Sources
    /// that never resample ignore it.
    fn set_resampler_cache(&mut self, _cache: ResamplerCache) {}
}
