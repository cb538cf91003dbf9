//! A packetizing PCM16 "encoder".
//!
//! Submitted PCM is cut into access units of [`ENCODER_FRAME_SAMPLES`] frames
//! carrying little-endian samples, which is what [`WavMuxer`](super::wav::WavMuxer)
//! expects. It follows the slot protocol of hardware encoders, including the
//! one-time format event and back-pressure on input.

use crate::codec::{
    AudioEncoder, BufferInfo, ENCODER_FRAME_SAMPLES, EncoderConfig, EncoderOutput, MIME_AUDIO_RAW,
    TrackFormat,
};
use crate::dsp::samples_to_us;
use crate::error::{MixerError, Result};
use std::collections::VecDeque;
use tracing::instrument;

const INPUT_SLOTS: usize = 2;
const OUTPUT_SLOTS: usize = 4;
/// Input is refused while more than this many units wait to be dequeued.
const MAX_PENDING_UNITS: usize = 8;

struct Unit {
    data: Vec<u8>,
    info: BufferInfo,
}

#[derive(Default)]
pub struct PcmEncoder {
    config: Option<EncoderConfig>,
    inputs: Vec<Vec<i16>>,
    free_inputs: VecDeque<usize>,
    outputs: Vec<Option<Vec<u8>>>,
    ready: VecDeque<Unit>,
    pending: Vec<i16>,
    format_announced: bool,
    input_done: bool,
    first_pts_us: Option<u64>,
    emitted_samples: u64,
}

impl PcmEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame_samples(config: &EncoderConfig) -> usize {
        ENCODER_FRAME_SAMPLES as usize * config.channel_count as usize
    }

    fn emit(&mut self, samples: &[i16], end_of_stream: bool) {
        let Some(config) = &self.config else {
            return;
        };
        let pts = self.first_pts_us.unwrap_or_default()
            + samples_to_us(
                self.emitted_samples,
                config.sample_rate,
                config.channel_count,
            );

        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.emitted_samples += samples.len() as u64;
        self.ready.push_back(Unit {
            info: BufferInfo {
                presentation_time_us: pts,
                size: data.len(),
                end_of_stream,
            },
            data,
        });
    }
}

impl AudioEncoder for PcmEncoder {
    fn mime_type(&self) -> &str {
        MIME_AUDIO_RAW
    }

    #[instrument(level = "debug", skip(self), err)]
    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        if config.mime != MIME_AUDIO_RAW {
            return Err(MixerError::Config(format!(
                "PCM encoder cannot produce {}",
                config.mime
            )));
        }
        if config.sample_rate == 0 || config.channel_count == 0 {
            return Err(MixerError::Config(format!(
                "invalid encoder format: {} Hz, {} channels",
                config.sample_rate, config.channel_count
            )));
        }

        let channels = config.channel_count as usize;
        let slot_samples = config.max_input_size / 2 / channels * channels;
        if slot_samples == 0 {
            return Err(MixerError::Config(format!(
                "input slot of {} bytes cannot hold a frame",
                config.max_input_size
            )));
        }

        *self = Self {
            config: Some(config.clone()),
            inputs: vec![vec![0; slot_samples]; INPUT_SLOTS],
            free_inputs: (0..INPUT_SLOTS).collect(),
            outputs: vec![None; OUTPUT_SLOTS],
            ..Self::default()
        };
        Ok(())
    }

    fn dequeue_input_buffer(&mut self) -> Option<usize> {
        if self.config.is_none() || self.input_done || self.ready.len() > MAX_PENDING_UNITS {
            return None;
        }
        self.free_inputs.pop_front()
    }

    fn input_buffer(&mut self, index: usize) -> &mut [i16] {
        &mut self.inputs[index]
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        len: usize,
        presentation_time_us: u64,
        end_of_stream: bool,
    ) -> Result<()> {
        let Some(config) = &self.config else {
            return Err(MixerError::InvalidState("encoder has not been configured"));
        };
        if self.input_done {
            return Err(MixerError::InvalidState("encoder input already ended"));
        }
        let slot = self
            .inputs
            .get(index)
            .ok_or_else(|| MixerError::io(format!("unknown input slot {index}")))?;
        if len > slot.len() {
            return Err(MixerError::io(format!(
                "{len} samples overflow input slot of {}",
                slot.len()
            )));
        }

        let frame = Self::frame_samples(config);
        self.first_pts_us.get_or_insert(presentation_time_us);
        self.pending.extend_from_slice(&slot[..len]);
        self.free_inputs.push_back(index);

        let full = self.pending.len() / frame * frame;
        let pending = std::mem::take(&mut self.pending);
        for unit in pending[..full].chunks_exact(frame) {
            self.emit(unit, false);
        }
        self.pending = pending;
        self.pending.drain(..full);

        if end_of_stream {
            if !self.pending.is_empty() {
                let tail = std::mem::take(&mut self.pending);
                self.emit(&tail, false);
            }
            self.emit(&[], true);
            self.input_done = true;
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self) -> Result<EncoderOutput> {
        let Some(config) = &self.config else {
            return Err(MixerError::InvalidState("encoder has not been configured"));
        };

        if !self.format_announced {
            if self.first_pts_us.is_none() {
                return Ok(EncoderOutput::TryAgainLater);
            }
            self.format_announced = true;
            return Ok(EncoderOutput::FormatChanged(TrackFormat {
                mime: config.mime.clone(),
                sample_rate: config.sample_rate,
                bit_rate: config.bit_rate,
                channel_count: config.channel_count,
            }));
        }

        let Some(index) = self.outputs.iter().position(Option::is_none) else {
            return Ok(EncoderOutput::TryAgainLater);
        };
        let Some(unit) = self.ready.pop_front() else {
            return Ok(EncoderOutput::TryAgainLater);
        };

        self.outputs[index] = Some(unit.data);
        Ok(EncoderOutput::Buffer {
            index,
            info: unit.info,
        })
    }

    fn output_buffer(&self, index: usize) -> &[u8] {
        self.outputs
            .get(index)
            .and_then(Option::as_deref)
            .unwrap_or_default()
    }

    fn release_output_buffer(&mut self, index: usize) {
        if let Some(slot) = self.outputs.get_mut(index) {
            *slot = None;
        }
    }

    fn stop(&mut self) -> Result<()> {
        if !self.ready.is_empty() {
            tracing::debug!(dropped = self.ready.len(), "Stopping encoder with pending units");
        }
        self.ready.clear();
        self.pending.clear();
        self.input_done = true;
        Ok(())
    }

    fn release(&mut self) {
        *self = Self::default();
    }
}
