use crate::resample::ResamplerQuality;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_BIT_RATE: u32 = 128_000;
pub const DEFAULT_CHANNEL_COUNT: u16 = 2;
/// Bytes per encoder input slot.
pub const DEFAULT_MAX_INPUT_SIZE: usize = 256 * 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixingType {
    /// Sources overlay each other and are averaged sample by sample.
    #[default]
    Parallel,
    /// Sources play one after another in insertion order.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Pinned output sample rate; negotiated from the sources when unset.
    pub sample_rate: Option<u32>,
    pub bit_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub mixing_type: MixingType,
    pub looping_enabled: bool,
    pub resampler: ResamplerQuality,
    pub max_input_size: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            bit_rate: None,
            channel_count: None,
            mixing_type: MixingType::default(),
            looping_enabled: false,
            resampler: ResamplerQuality::default(),
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
        }
    }
}
