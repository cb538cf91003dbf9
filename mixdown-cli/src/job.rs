use crate::config::{AppConfig, InputConfig};
use anyhow::Context;
use mixdown_audio::codec::pcm::PcmEncoder;
use mixdown_audio::codec::wav::{WavDecoder, WavMuxer};
use mixdown_audio::{AudioMixer, DecodedSource, SilenceSource};
use std::fs::File;

/// Builds an idle mixer writing the configured inputs into the output WAV file.
pub fn build_mixer(config: &AppConfig) -> anyhow::Result<AudioMixer> {
    let muxer = WavMuxer::create(&config.output.path)
        .with_context(|| format!("Failed to create output {}", config.output.path.display()))?;
    let mut mixer = AudioMixer::new(PcmEncoder::new(), muxer).with_config(config.mixer.clone());

    for (i, input) in config.inputs.iter().enumerate() {
        add_input(&mut mixer, input).with_context(|| format!("Failed to add input #{i}"))?;
    }
    Ok(mixer)
}

fn add_input(mixer: &mut AudioMixer, input: &InputConfig) -> anyhow::Result<()> {
    match (&input.path, input.silence_us) {
        (Some(path), None) => {
            let source = match input.byte_range {
                Some(range) => {
                    let file = File::open(path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    DecodedSource::new(WavDecoder::from_file_range(
                        file,
                        range.offset,
                        range.length,
                    )?)
                }
                None => DecodedSource::new(
                    WavDecoder::open(path)
                        .with_context(|| format!("Failed to open {}", path.display()))?,
                ),
            };
            let source = source
                .with_trim(input.start_time_us, input.end_time_us)
                .with_start_offset_us(input.start_offset_us)
                .with_volume(input.volume);
            tracing::debug!(?path, "Adding file input");
            mixer.add_source(source)?;
        }
        (None, Some(duration_us)) => {
            tracing::debug!(duration_us, "Adding silence input");
            mixer.add_source(SilenceSource::new(duration_us))?;
        }
        _ => anyhow::bail!("Exactly one of `path` or `silence_us` must be set"),
    }
    Ok(())
}
