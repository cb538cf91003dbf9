mod common;

use common::{read_wav, spec, wav_mixer, write_wav};
use mixdown_audio::codec::wav::WavDecoder;
use mixdown_audio::{
    DecodedSource, MixerConfig, MixerEvent, MixingType, ResamplerQuality, SilenceSource,
};
use pretty_assertions::assert_eq;
use std::io::{Cursor, Write};
use test_log::test;
use tokio::sync::mpsc;

#[test]
fn parallel_mix_averages_until_the_shorter_input_ends() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let long = write_wav(dir.path(), "long.wav", 44_100, 2, 44_100, |_| 1000)?;
    let short = write_wav(dir.path(), "short.wav", 44_100, 2, 22_050, |_| 3000)?;
    let out = dir.path().join("out.wav");

    let mut mixer = wav_mixer(&out)?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&long)?))?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&short)?))?;
    mixer.start()?;
    assert_eq!(mixer.output_duration_us(), 1_000_000);
    mixer.process_sync()?;

    let (out_spec, samples) = read_wav(&out)?;
    assert_eq!(out_spec, spec(44_100, 2));
    assert_eq!(samples.len(), 88_200);
    assert!(samples[..44_100].iter().all(|&s| s == 2000));
    assert!(samples[44_100..].iter().all(|&s| s == 1000));
    Ok(())
}

#[test]
fn sequential_mix_normalizes_every_input() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let low = write_wav(dir.path(), "low.wav", 8_000, 1, 2_000, |_| 500)?;
    let high = write_wav(dir.path(), "high.wav", 16_000, 2, 8_000, |_| 700)?;
    let out = dir.path().join("out.wav");

    let mut mixer = wav_mixer(&out)?;
    mixer.set_mixing_type(MixingType::Sequential)?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&low)?))?;
    mixer.add_source(SilenceSource::new(250_000))?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&high)?))?;
    mixer.start()?;
    assert_eq!(mixer.output_sample_rate(), Some(16_000));
    assert_eq!(mixer.output_channel_count(), Some(2));
    assert_eq!(mixer.output_duration_us(), 1_000_000);
    mixer.process_sync()?;

    let (out_spec, samples) = read_wav(&out)?;
    assert_eq!(out_spec, spec(16_000, 2));
    assert_eq!(samples.len(), 32_000);
    assert!(samples[..8_000].iter().all(|&s| s == 500));
    assert!(samples[8_000..16_000].iter().all(|&s| s == 0));
    assert!(samples[16_000..].iter().all(|&s| s == 700));
    Ok(())
}

#[test]
fn sinc_resampled_inputs_keep_their_full_length() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let first = write_wav(dir.path(), "first.wav", 44_100, 1, 44_100, |_| 1000)?;
    let second = write_wav(dir.path(), "second.wav", 48_000, 1, 24_000, |_| 2000)?;
    let out = dir.path().join("out.wav");

    let mut mixer = wav_mixer(&out)?.with_config(MixerConfig {
        mixing_type: MixingType::Sequential,
        sample_rate: Some(44_100),
        resampler: ResamplerQuality::Sinc,
        ..MixerConfig::default()
    });
    mixer.add_source(DecodedSource::new(WavDecoder::open(&first)?))?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&second)?))?;
    mixer.start()?;
    assert_eq!(mixer.output_duration_us(), 1_500_000);
    mixer.process_sync()?;

    let (out_spec, samples) = read_wav(&out)?;
    assert_eq!(out_spec, spec(44_100, 1));
    assert_eq!(samples.len(), 66_150);
    assert!(samples[..44_100].iter().all(|&s| s == 1000));
    assert!(samples[44_200..66_000].iter().all(|&s| (s - 2000).abs() < 50));
    Ok(())
}

#[test]
fn whole_file_at_44_1_khz_keeps_every_frame() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_wav(dir.path(), "in.wav", 44_100, 1, 1000, |i| i as i16)?;
    let out = dir.path().join("out.wav");

    let mut mixer = wav_mixer(&out)?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&input)?))?;
    mixer.start()?;
    mixer.process_sync()?;

    let (_, samples) = read_wav(&out)?;
    assert_eq!(samples, (0..1000).collect::<Vec<i16>>());
    Ok(())
}

#[test]
fn trim_offset_and_volume_shape_the_output() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let ramp = write_wav(dir.path(), "ramp.wav", 1_000, 1, 1_000, |i| i as i16)?;
    let out = dir.path().join("out.wav");

    let mut mixer = wav_mixer(&out)?;
    mixer.add_source(
        DecodedSource::new(WavDecoder::open(&ramp)?)
            .with_trim(200_000, Some(400_000))
            .with_start_offset_us(100_000)
            .with_volume(0.5),
    )?;
    mixer.start()?;
    assert_eq!(mixer.output_duration_us(), 300_000);
    mixer.process_sync()?;

    let (_, samples) = read_wav(&out)?;
    let expected: Vec<i16> = std::iter::repeat_n(0, 100)
        .chain((200..400).map(|i| i / 2))
        .collect();
    assert_eq!(samples, expected);
    Ok(())
}

#[test]
fn looping_fills_the_base_duration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = write_wav(dir.path(), "base.wav", 1_000, 1, 1_000, |_| 0)?;
    let jingle = write_wav(dir.path(), "jingle.wav", 1_000, 1, 300, |_| 400)?;
    let out = dir.path().join("out.wav");

    let mut mixer = wav_mixer(&out)?;
    mixer.set_looping_enabled(true)?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&jingle)?))?;
    mixer.add_source(DecodedSource::new(WavDecoder::open(&base)?))?;
    mixer.start()?;
    mixer.process_sync()?;

    let (_, samples) = read_wav(&out)?;
    assert_eq!(samples, vec![200; 1_000]);
    Ok(())
}

#[test]
fn decodes_a_stream_embedded_in_a_larger_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut wav = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut wav, spec(1_000, 1))?;
        for i in 0..500 {
            writer.write_sample(i as i16)?;
        }
        writer.finalize()?;
    }
    let wav = wav.into_inner();

    let bundle = dir.path().join("bundle.bin");
    let mut file = std::fs::File::create(&bundle)?;
    file.write_all(&[0xAA; 64])?;
    file.write_all(&wav)?;
    file.write_all(&[0x55; 32])?;
    drop(file);

    let out = dir.path().join("out.wav");
    let mut mixer = wav_mixer(&out)?;
    let decoder = WavDecoder::from_file_range(std::fs::File::open(&bundle)?, 64, wav.len() as u64)?;
    mixer.add_source(DecodedSource::new(decoder))?;
    mixer.start()?;
    mixer.process_sync()?;

    let (_, samples) = read_wav(&out)?;
    assert_eq!(samples, (0..500).collect::<Vec<i16>>());
    Ok(())
}

#[test(tokio::test)]
async fn async_mix_reports_progress_until_the_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_wav(dir.path(), "in.wav", 48_000, 2, 96_000, |i| (i % 100) as i16)?;
    let out = dir.path().join("out.wav");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut mixer = wav_mixer(&out)?.with_listener(tx);
    mixer.add_source(DecodedSource::new(WavDecoder::open(&input)?))?;
    mixer.start()?;
    mixer.process_async()?;

    let mut progress = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            MixerEvent::Progress(p) => progress.push(p),
            MixerEvent::End => break,
            MixerEvent::Error(err) => anyhow::bail!("mixing failed: {err}"),
        }
    }
    mixer.wait().await?;

    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
    assert_eq!(mixer.progress(), 1.0);

    let (_, samples) = read_wav(&out)?;
    assert_eq!(samples.len(), 192_000);
    assert_eq!(samples[..4], [0, 0, 1, 1]);
    Ok(())
}
