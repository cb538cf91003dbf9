pub mod codec;
pub mod config;
pub mod dsp;
pub mod error;
pub mod listener;
pub mod mixer;
pub mod normalize;
pub mod resample;
pub mod sources;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{MixerConfig, MixingType};
pub use error::{MixerError, Result};
pub use listener::{MixerEvent, ProgressListener};
pub use mixer::{AudioMixer, MixerState};
pub use resample::{ResamplerCache, ResamplerQuality};
pub use sources::{AudioSource, DecodedSource, SilenceSource};
