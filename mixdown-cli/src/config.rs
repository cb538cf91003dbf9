use anyhow::Context;
use config::{Config, Environment, File};
use mixdown_audio::MixerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "MIXDOWN";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub mixer: MixerConfig,
    pub inputs: Vec<InputConfig>,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads defaults, then the optional job file, then `MIXDOWN__*` environment
    /// variables (e.g. `MIXDOWN__MIXER__SAMPLE_RATE=48000`).
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build config")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize config")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.output.path.as_os_str().is_empty() {
            anyhow::bail!("Output path is empty");
        } else if self.inputs.is_empty() {
            anyhow::bail!("No inputs configured");
        } else if self.mixer.max_input_size < 2 {
            anyhow::bail!("Encoder input size must hold at least one sample");
        }

        for (i, input) in self.inputs.iter().enumerate() {
            input
                .validate()
                .with_context(|| format!("Invalid input #{i}"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub path: PathBuf,
}

/// One input of the mix: a WAV file (optionally embedded in a larger file) or
/// a stretch of silence.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub path: Option<PathBuf>,
    pub byte_range: Option<ByteRangeConfig>,
    pub silence_us: Option<u64>,
    pub start_offset_us: u64,
    pub start_time_us: u64,
    pub end_time_us: Option<u64>,
    pub volume: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: None,
            byte_range: None,
            silence_us: None,
            start_offset_us: 0,
            start_time_us: 0,
            end_time_us: None,
            volume: 1.0,
        }
    }
}

impl InputConfig {
    pub fn file(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match (&self.path, self.silence_us) {
            (Some(_), Some(_)) | (None, None) => {
                anyhow::bail!("Exactly one of `path` or `silence_us` must be set")
            }
            (None, Some(_)) if self.byte_range.is_some() => {
                anyhow::bail!("`byte_range` requires `path`")
            }
            _ => {}
        }
        if self.volume < 0.0 {
            anyhow::bail!("Volume must not be negative");
        }
        if let Some(end) = self.end_time_us
            && end < self.start_time_us
        {
            anyhow::bail!("End time precedes start time");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeConfig {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "mixdown=info,mixdown_audio=info".to_string(),
        }
    }
}
