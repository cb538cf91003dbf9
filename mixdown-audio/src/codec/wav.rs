//! PCM16 WAV decoding and single-track WAV container writing via `hound`.

use crate::codec::{AudioDecoder, BufferInfo, DecodedFrame, MIME_AUDIO_RAW, Muxer, TrackFormat};
use crate::dsp::samples_to_us;
use crate::error::{MixerError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::instrument;

/// Frames handed out per `decode` call.
const FRAMES_PER_DECODE: u64 = 1024;

pub struct WavDecoder<R: Read + Seek> {
    reader: WavReader<R>,
    spec: WavSpec,
    total_frames: u64,
    start_time_us: u64,
    /// Trim end, `None` reads to the end of the file.
    end_time_us: Option<u64>,
    looping: bool,
    position: u64,
    buffer: Vec<i16>,
    next_index: usize,
    started: bool,
}

impl WavDecoder<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(?path, "Opening WAV source");
        Self::from_file(File::open(path)?)
    }

    pub fn from_file(file: File) -> Result<Self> {
        Self::new(BufReader::new(file))
    }
}

impl WavDecoder<BufReader<ByteRange<File>>> {
    /// Decodes the WAV stream stored at `offset..offset + length` of `file`.
    pub fn from_file_range(file: File, offset: u64, length: u64) -> Result<Self> {
        Self::new(BufReader::new(ByteRange::new(file, offset, length)?))
    }
}

impl<R: Read + Seek> WavDecoder<R> {
    pub fn new(reader: R) -> Result<Self> {
        let reader = WavReader::new(reader).map_err(MixerError::from_read)?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(MixerError::Decode(format!(
                "unsupported WAV sample format: {:?} {} bit",
                spec.sample_format, spec.bits_per_sample
            )));
        }
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(MixerError::Decode("WAV header has no audio".to_string()));
        }

        let total_frames = reader.duration() as u64;

        Ok(Self {
            reader,
            spec,
            total_frames,
            start_time_us: 0,
            end_time_us: None,
            looping: false,
            position: 0,
            buffer: Vec::new(),
            next_index: 0,
            started: false,
        })
    }

    /// Duration of the whole file, ignoring the trim window.
    pub fn file_duration_us(&self) -> u64 {
        samples_to_us(self.total_frames, self.spec.sample_rate, 1)
    }

    fn us_to_frame(&self, time_us: u64) -> u64 {
        (time_us as u128 * self.spec.sample_rate as u128 / 1_000_000) as u64
    }

    fn window(&self) -> (u64, u64) {
        let start = self.us_to_frame(self.start_time_us).min(self.total_frames);
        let end = self
            .end_time_us
            .map_or(self.total_frames, |us| self.us_to_frame(us))
            .min(self.total_frames)
            .max(start);
        (start, end)
    }

    fn seek_to(&mut self, frame: u64) -> Result<()> {
        self.reader.seek(frame as u32)?;
        self.position = frame;
        Ok(())
    }
}

impl<R: Read + Seek + Send> AudioDecoder for WavDecoder<R> {
    #[instrument(level = "debug", skip(self), err)]
    fn start(&mut self) -> Result<()> {
        let (start, _) = self.window();
        self.seek_to(start)?;
        self.started = true;
        Ok(())
    }

    fn decode(&mut self) -> Result<Option<DecodedFrame<'_>>> {
        if !self.started {
            return Err(MixerError::InvalidState("decoder has not been started"));
        }

        let (start, end) = self.window();
        if self.position >= end {
            if !self.looping || end == start {
                return Ok(None);
            }
            tracing::trace!(start, "Looping WAV source back to window start");
            self.seek_to(start)?;
        }

        let channels = self.spec.channels as usize;
        let frames = FRAMES_PER_DECODE.min(end - self.position) as usize;
        self.buffer.clear();
        for sample in self.reader.samples::<i16>().take(frames * channels) {
            self.buffer.push(sample.map_err(MixerError::from_read)?);
        }
        self.buffer.truncate(self.buffer.len() / channels * channels);

        if self.buffer.is_empty() {
            // header promised more data than the file holds
            tracing::warn!(position = self.position, "WAV source ended early");
            self.position = end;
            return Ok(None);
        }
        self.position += (self.buffer.len() / channels) as u64;

        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        Ok(Some(DecodedFrame {
            index,
            samples: &self.buffer,
        }))
    }

    fn release_output_buffer(&mut self, index: usize) {
        debug_assert_eq!(index.wrapping_add(1), self.next_index);
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.buffer = Vec::new();
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn bit_rate(&self) -> u32 {
        self.spec.sample_rate * self.spec.channels as u32 * 16
    }

    fn channel_count(&self) -> u16 {
        self.spec.channels
    }

    fn start_time_us(&self) -> u64 {
        self.start_time_us
    }

    fn set_start_time_us(&mut self, time_us: u64) {
        self.start_time_us = time_us;
    }

    fn end_time_us(&self) -> u64 {
        self.end_time_us.unwrap_or_else(|| self.file_duration_us())
    }

    fn set_end_time_us(&mut self, time_us: u64) {
        self.end_time_us = Some(time_us).filter(|&us| us < self.file_duration_us());
    }

    fn set_looping_enabled(&mut self, enabled: bool) {
        self.looping = enabled;
    }
}

/// Read/seek view over `offset..offset + length` of an underlying stream.
pub struct ByteRange<R> {
    inner: R,
    offset: u64,
    length: u64,
    pos: u64,
}

impl<R: Read + Seek> ByteRange<R> {
    pub fn new(mut inner: R, offset: u64, length: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            inner,
            offset,
            length,
            pos: 0,
        })
    }
}

impl<R: Read> Read for ByteRange<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let left = self.length.saturating_sub(self.pos);
        if left == 0 {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(left) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for ByteRange<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.length.checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before range start"))?;

        self.inner.seek(SeekFrom::Start(self.offset + target))?;
        self.pos = target;
        Ok(target)
    }
}

/// Single-track WAV container writer. The track must be added before `start`.
pub struct WavMuxer<W: Write + Seek> {
    sink: Option<W>,
    spec: Option<WavSpec>,
    writer: Option<WavWriter<W>>,
    samples_written: u64,
}

impl WavMuxer<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(?path, "Creating WAV output");
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Seek> WavMuxer<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: Some(sink),
            spec: None,
            writer: None,
            samples_written: 0,
        }
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl<W: Write + Seek + Send> Muxer for WavMuxer<W> {
    #[instrument(level = "debug", skip(self), err)]
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if self.spec.is_some() {
            return Err(MixerError::Config(
                "WAV container holds a single track".to_string(),
            ));
        }
        if format.mime != MIME_AUDIO_RAW {
            return Err(MixerError::Config(format!(
                "WAV container cannot hold {}",
                format.mime
            )));
        }

        self.spec = Some(WavSpec {
            channels: format.channel_count,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        });
        Ok(0)
    }

    #[instrument(level = "debug", skip(self), err)]
    fn start(&mut self) -> Result<()> {
        let spec = self
            .spec
            .ok_or(MixerError::InvalidState("no track added to WAV container"))?;
        let sink = self
            .sink
            .take()
            .ok_or(MixerError::InvalidState("WAV container already started"))?;

        self.writer = Some(WavWriter::new(sink, spec).map_err(MixerError::from_write)?);
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if track_index != 0 {
            return Err(MixerError::io(format!("unknown track {track_index}")));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or(MixerError::InvalidState("WAV container not started"))?;

        let payload = &data[..info.size.min(data.len())];
        for bytes in payload.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))
                .map_err(MixerError::from_write)?;
        }
        self.samples_written += (payload.len() / 2) as u64;
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(samples = self.samples_written), err)]
    fn stop(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or(MixerError::InvalidState("WAV container not started"))?;
        writer.finalize().map_err(MixerError::from_write)
    }

    fn release(&mut self) {
        self.sink = None;
        if let Some(writer) = self.writer.take()
            && let Err(err) = writer.finalize()
        {
            tracing::warn!(?err, "Failed to finalize WAV container on release");
        }
    }
}
