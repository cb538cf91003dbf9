use crate::config::{AppConfig, InputConfig};
use clap::{Parser, ValueEnum};
use mixdown_audio::MixingType;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Mix audio files into a single track")]
#[command(
    long_about = "Mixes WAV inputs into one WAV track, either overlaid (parallel) or one after another (sequential)"
)]
pub struct CliArgs {
    /// Mix job file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output WAV file, overriding the job file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    pub mixing_type: Option<MixingTypeArg>,

    /// Loop inputs shorter than the output (parallel mixing only)
    #[arg(short, long)]
    pub looping: bool,

    /// WAV inputs appended to the job's inputs
    pub inputs: Vec<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum MixingTypeArg {
    Parallel,
    Sequential,
}

impl From<MixingTypeArg> for MixingType {
    fn from(arg: MixingTypeArg) -> Self {
        match arg {
            MixingTypeArg::Parallel => MixingType::Parallel,
            MixingTypeArg::Sequential => MixingType::Sequential,
        }
    }
}

impl CliArgs {
    /// Applies command-line overrides on top of the loaded job.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(output) = &self.output {
            config.output.path = output.clone();
        }
        if let Some(mixing_type) = self.mixing_type {
            config.mixer.mixing_type = mixing_type.into();
        }
        if self.looping {
            config.mixer.looping_enabled = true;
        }
        config
            .inputs
            .extend(self.inputs.iter().cloned().map(InputConfig::file));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn flags_override_the_job() {
        let args = CliArgs::parse_from([
            "mixdown",
            "--output",
            "mix.wav",
            "--mixing-type",
            "sequential",
            "--looping",
            "a.wav",
            "b.wav",
        ]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.output.path, PathBuf::from("mix.wav"));
        assert_eq!(config.mixer.mixing_type, MixingType::Sequential);
        assert!(config.mixer.looping_enabled);
        assert_eq!(
            config.inputs,
            vec![
                InputConfig::file(PathBuf::from("a.wav")),
                InputConfig::file(PathBuf::from("b.wav")),
            ]
        );
    }

    #[test]
    fn no_flags_keep_the_job() {
        let args = CliArgs::parse_from(["mixdown"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config, AppConfig::default());
    }
}
