//! Narrow interfaces over the host codec stack.
//!
//! The mixing engine only talks to decoders, encoders and container writers
//! through these traits. [`wav`] and [`pcm`] provide working implementations.

pub mod pcm;
pub mod wav;

use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// AAC low complexity object type.
pub const AAC_PROFILE_LC: u32 = 2;

/// Samples per channel in one encoded access unit.
pub const ENCODER_FRAME_SAMPLES: u32 = 1024;

/// One frame of native-format PCM16 produced by a decoder. The frame borrows
/// the decoder's output buffer until it is handed back with
/// [`AudioDecoder::release_output_buffer`].
#[derive(Debug)]
pub struct DecodedFrame<'a> {
    pub index: usize,
    pub samples: &'a [i16],
}

/// Pull interface over a bitstream decoder producing interleaved PCM16.
///
/// The decoder owns the trim window: it starts decoding at `start_time_us`,
/// stops before `end_time_us`, and when looping is enabled restarts from the
/// window start instead of signalling end of stream.
pub trait AudioDecoder: Send {
    fn start(&mut self) -> Result<()>;

    /// Next decoded frame, or `None` once the trim window has been exhausted.
    fn decode(&mut self) -> Result<Option<DecodedFrame<'_>>>;

    fn release_output_buffer(&mut self, index: usize);

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);

    fn sample_rate(&self) -> u32;

    fn bit_rate(&self) -> u32;

    fn channel_count(&self) -> u16;

    fn start_time_us(&self) -> u64;

    fn set_start_time_us(&mut self, time_us: u64);

    fn end_time_us(&self) -> u64;

    fn set_end_time_us(&mut self, time_us: u64);

    fn set_looping_enabled(&mut self, enabled: bool);
}

/// Parameters the encoder is configured with once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub mime: String,
    pub profile: u32,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub channel_count: u16,
    /// Capacity of one input slot in bytes.
    pub max_input_size: usize,
}

/// Format of the encoded track as announced by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    pub mime: String,
    pub sample_rate: u32,
    pub bit_rate: u32,
    pub channel_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub presentation_time_us: u64,
    pub size: usize,
    pub end_of_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// Nothing ready yet.
    TryAgainLater,
    /// One-time event carrying the track format to register with the container.
    FormatChanged(TrackFormat),
    /// An encoded unit is ready at the given output slot.
    Buffer { index: usize, info: BufferInfo },
}

/// Slot-based encoder interface with back-pressure.
pub trait AudioEncoder: Send {
    /// Codec this encoder produces; used as the configured mime type.
    fn mime_type(&self) -> &str;

    /// Configures and starts the encoder.
    fn configure(&mut self, config: &EncoderConfig) -> Result<()>;

    /// Index of a free input slot, or `None` if the encoder cannot accept input yet.
    fn dequeue_input_buffer(&mut self) -> Option<usize>;

    /// Writable PCM16 view of an input slot obtained from `dequeue_input_buffer`.
    fn input_buffer(&mut self, index: usize) -> &mut [i16];

    /// Submits `len` samples of the slot. `end_of_stream` marks the last submission.
    fn queue_input_buffer(
        &mut self,
        index: usize,
        len: usize,
        presentation_time_us: u64,
        end_of_stream: bool,
    ) -> Result<()>;

    fn dequeue_output_buffer(&mut self) -> Result<EncoderOutput>;

    fn output_buffer(&self, index: usize) -> &[u8];

    fn release_output_buffer(&mut self, index: usize);

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// Container writer accepting one or more encoded tracks.
pub trait Muxer: Send {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    fn start(&mut self) -> Result<()>;

    fn write_sample(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// Container writer guarded for use from several pipelines at once.
pub type SharedMuxer = Arc<Mutex<Box<dyn Muxer>>>;

pub fn shared_muxer(muxer: impl Muxer + 'static) -> SharedMuxer {
    Arc::new(Mutex::new(Box::new(muxer)))
}
