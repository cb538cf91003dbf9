use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    /// An operation was called out of lifecycle order.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("resampling error: {0}")]
    Resample(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = MixerError> = std::result::Result<T, E>;

impl MixerError {
    pub(crate) fn io(msg: impl Into<String>) -> Self {
        MixerError::Io(std::io::Error::other(msg.into()))
    }

    /// Maps a `hound` error raised while reading a source.
    pub(crate) fn from_read(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(err) => MixerError::Io(err),
            err => MixerError::Decode(err.to_string()),
        }
    }

    /// Maps a `hound` error raised while writing the container.
    pub(crate) fn from_write(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(err) => MixerError::Io(err),
            err => MixerError::Io(std::io::Error::other(err)),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for MixerError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        tracing::debug!(?err, "Failed to construct resampler");
        MixerError::Config(err.to_string())
    }
}

impl From<rubato::ResampleError> for MixerError {
    fn from(err: rubato::ResampleError) -> Self {
        MixerError::Resample(err.to_string())
    }
}
