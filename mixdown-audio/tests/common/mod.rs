use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use mixdown_audio::AudioMixer;
use mixdown_audio::codec::pcm::PcmEncoder;
use mixdown_audio::codec::wav::WavMuxer;
use std::path::{Path, PathBuf};

#[allow(unused)]
pub fn spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Writes `frames` frames where every channel of frame `i` holds `sample(i)`.
#[allow(unused)]
pub fn write_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    frames: usize,
    sample: impl Fn(usize) -> i16,
) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let mut writer = WavWriter::create(&path, spec(sample_rate, channels))?;
    for i in 0..frames {
        for _ in 0..channels {
            writer.write_sample(sample(i))?;
        }
    }
    writer.finalize()?;
    Ok(path)
}

#[allow(unused)]
pub fn read_wav(path: &Path) -> anyhow::Result<(WavSpec, Vec<i16>)> {
    let mut reader = WavReader::open(path)?;
    let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    Ok((reader.spec(), samples))
}

/// Mixer encoding to PCM and writing a WAV file at `path`.
#[allow(unused)]
pub fn wav_mixer(path: &Path) -> anyhow::Result<AudioMixer> {
    Ok(AudioMixer::new(PcmEncoder::new(), WavMuxer::create(path)?))
}
