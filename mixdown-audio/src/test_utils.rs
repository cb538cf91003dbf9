//! In-memory decoder, encoder and container writer for exercising the engine
//! without touching the filesystem.

use crate::codec::{
    AudioDecoder, AudioEncoder, BufferInfo, DecodedFrame, EncoderConfig, EncoderOutput,
    MIME_AUDIO_RAW, Muxer, TrackFormat,
};
use crate::dsp::samples_to_us;
use crate::error::{MixerError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Decoder over a fixed interleaved sample vector, handing out small frames.
pub struct MemoryDecoder {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
    frame_len: usize,
    start_time_us: u64,
    end_time_us: u64,
    looping: bool,
    position: usize,
    started: bool,
    fail_after: Option<usize>,
    buffer: Vec<i16>,
    next_index: usize,
}

impl MemoryDecoder {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        let frames = samples.len() as u64 / channels as u64;
        Self {
            sample_rate,
            channels,
            end_time_us: samples_to_us(frames, sample_rate, 1),
            samples,
            frame_len: 64,
            start_time_us: 0,
            looping: false,
            position: 0,
            started: false,
            fail_after: None,
            buffer: Vec::new(),
            next_index: 0,
        }
    }

    /// Decoder of `duration_us` of a constant `value`.
    pub fn constant(sample_rate: u32, channels: u16, duration_us: u64, value: i16) -> Self {
        let frames = duration_us as u128 * sample_rate as u128 / 1_000_000;
        Self::new(
            sample_rate,
            channels,
            vec![value; frames as usize * channels as usize],
        )
    }

    /// Decoder whose every `decode` call fails.
    pub fn failing(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, vec![0; channels as usize * 16]).fail_after(0)
    }

    /// Fails every `decode` call after `frames` successful ones.
    pub fn fail_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    fn frame_at(&self, time_us: u64) -> usize {
        let frame = time_us as u128 * self.sample_rate as u128 / 1_000_000;
        frame as usize * self.channels as usize
    }
}

impl AudioDecoder for MemoryDecoder {
    fn start(&mut self) -> Result<()> {
        self.position = self.frame_at(self.start_time_us).min(self.samples.len());
        self.started = true;
        Ok(())
    }

    fn decode(&mut self) -> Result<Option<DecodedFrame<'_>>> {
        if !self.started {
            return Err(MixerError::InvalidState("decoder has not been started"));
        }
        if self.fail_after.is_some_and(|frames| self.next_index >= frames) {
            return Err(MixerError::Decode("corrupt stream".to_string()));
        }

        let start = self.frame_at(self.start_time_us).min(self.samples.len());
        let end = self.frame_at(self.end_time_us).min(self.samples.len()).max(start);
        if self.position >= end {
            if !self.looping || start == end {
                return Ok(None);
            }
            self.position = start;
        }

        let len = (self.frame_len * self.channels as usize).min(end - self.position);
        self.buffer.clear();
        self.buffer
            .extend_from_slice(&self.samples[self.position..self.position + len]);
        self.position += len;

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(DecodedFrame {
            index,
            samples: &self.buffer,
        }))
    }

    fn release_output_buffer(&mut self, _index: usize) {}

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn bit_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 16
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn start_time_us(&self) -> u64 {
        self.start_time_us
    }

    fn set_start_time_us(&mut self, time_us: u64) {
        self.start_time_us = time_us;
    }

    fn end_time_us(&self) -> u64 {
        self.end_time_us
    }

    fn set_end_time_us(&mut self, time_us: u64) {
        let frames = self.samples.len() as u64 / self.channels as u64;
        self.end_time_us = time_us.min(samples_to_us(frames, self.sample_rate, 1));
    }

    fn set_looping_enabled(&mut self, enabled: bool) {
        self.looping = enabled;
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncoderScript {
    /// Report a timestamp of 0 on the final unit, like some platform encoders.
    pub zero_final_timestamp: bool,
    /// Refuse this many input slot requests before handing one out.
    pub stalled_inputs: usize,
    pub fail_configure: bool,
}

/// Encoder turning every submitted slot into one output unit. It holds back
/// the most recent unit until input ends and then flags it as end of stream.
pub struct ScriptedEncoder {
    script: EncoderScript,
    config: Option<EncoderConfig>,
    slot: Vec<i16>,
    slot_taken: bool,
    held: Option<(Vec<u8>, BufferInfo)>,
    ready: VecDeque<(Vec<u8>, BufferInfo)>,
    output: Option<Vec<u8>>,
    format_sent: bool,
    input_done: bool,
    stalls_left: usize,
    configured_with: Arc<Mutex<Option<EncoderConfig>>>,
}

impl ScriptedEncoder {
    pub fn new(script: EncoderScript) -> Self {
        Self {
            stalls_left: script.stalled_inputs,
            script,
            config: None,
            slot: Vec::new(),
            slot_taken: false,
            held: None,
            ready: VecDeque::new(),
            output: None,
            format_sent: false,
            input_done: false,
            configured_with: Arc::default(),
        }
    }

    /// Handle to the configuration the engine applied.
    pub fn configured_with(&self) -> Arc<Mutex<Option<EncoderConfig>>> {
        self.configured_with.clone()
    }
}

impl AudioEncoder for ScriptedEncoder {
    fn mime_type(&self) -> &str {
        MIME_AUDIO_RAW
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        if self.script.fail_configure {
            return Err(MixerError::io("encoder rejected configuration"));
        }
        self.slot = vec![0; config.max_input_size / 2];
        self.config = Some(config.clone());
        *self.configured_with.lock() = Some(config.clone());
        Ok(())
    }

    fn dequeue_input_buffer(&mut self) -> Option<usize> {
        if self.config.is_none() || self.input_done || self.slot_taken || !self.ready.is_empty() {
            return None;
        }
        if self.stalls_left > 0 {
            self.stalls_left -= 1;
            return None;
        }
        self.slot_taken = true;
        Some(0)
    }

    fn input_buffer(&mut self, _index: usize) -> &mut [i16] {
        &mut self.slot
    }

    fn queue_input_buffer(
        &mut self,
        _index: usize,
        len: usize,
        presentation_time_us: u64,
        end_of_stream: bool,
    ) -> Result<()> {
        self.slot_taken = false;
        if end_of_stream {
            self.input_done = true;
            let (data, mut info) = self.held.take().unwrap_or_default();
            info.end_of_stream = true;
            if self.script.zero_final_timestamp {
                info.presentation_time_us = 0;
            }
            self.ready.push_back((data, info));
            return Ok(());
        }

        let data: Vec<u8> = self.slot[..len]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let info = BufferInfo {
            presentation_time_us,
            size: data.len(),
            end_of_stream: false,
        };
        if let Some(previous) = self.held.replace((data, info)) {
            self.ready.push_back(previous);
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self) -> Result<EncoderOutput> {
        let Some(config) = &self.config else {
            return Err(MixerError::InvalidState("encoder has not been configured"));
        };
        if !self.format_sent {
            self.format_sent = true;
            return Ok(EncoderOutput::FormatChanged(TrackFormat {
                mime: config.mime.clone(),
                sample_rate: config.sample_rate,
                bit_rate: config.bit_rate,
                channel_count: config.channel_count,
            }));
        }
        if self.output.is_some() {
            return Ok(EncoderOutput::TryAgainLater);
        }
        match self.ready.pop_front() {
            Some((data, info)) => {
                self.output = Some(data);
                Ok(EncoderOutput::Buffer { index: 0, info })
            }
            None => Ok(EncoderOutput::TryAgainLater),
        }
    }

    fn output_buffer(&self, _index: usize) -> &[u8] {
        self.output.as_deref().unwrap_or_default()
    }

    fn release_output_buffer(&mut self, _index: usize) {
        self.output = None;
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) {
        self.config = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenSample {
    pub track_index: usize,
    pub presentation_time_us: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MuxerLog {
    pub tracks: Vec<TrackFormat>,
    pub samples: Vec<WrittenSample>,
    pub started: bool,
    pub stopped: bool,
    pub released: bool,
    /// Make `stop` fail, as a container does when finalized mid-stream.
    pub fail_stop: bool,
}

impl MuxerLog {
    pub fn timestamps(&self) -> Vec<u64> {
        self.samples
            .iter()
            .map(|s| s.presentation_time_us)
            .collect()
    }

    /// Written payload decoded back into PCM16 samples.
    pub fn pcm(&self) -> Vec<i16> {
        self.samples
            .iter()
            .flat_map(|s| {
                s.data
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
            })
            .collect()
    }
}

/// Container writer recording everything written to it. Clones share one log.
#[derive(Clone, Default)]
pub struct MemoryMuxer {
    log: Arc<Mutex<MuxerLog>>,
}

impl MemoryMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<Mutex<MuxerLog>> {
        self.log.clone()
    }
}

impl Muxer for MemoryMuxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        let mut log = self.log.lock();
        log.tracks.push(format.clone());
        Ok(log.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        self.log.lock().started = true;
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        let mut log = self.log.lock();
        if !log.started {
            return Err(MixerError::InvalidState("muxer not started"));
        }
        log.samples.push(WrittenSample {
            track_index,
            presentation_time_us: info.presentation_time_us,
            data: data[..info.size.min(data.len())].to_vec(),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut log = self.log.lock();
        if log.fail_stop {
            return Err(MixerError::io("container not finalizable"));
        }
        log.stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.log.lock().released = true;
    }
}
