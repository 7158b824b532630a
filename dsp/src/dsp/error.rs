//! Configuration errors. Everything fallible happens at init; the per-chunk
//! path has no error return.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported output sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("unsupported decimation ratio: {0}")]
    UnsupportedRatio(u32),

    #[error("invalid channel configuration ({channels_in} in, {channels_out} out)")]
    InvalidChannelCount {
        channels_in: usize,
        channels_out: usize,
    },

    #[error("analysis channel {channel} is not one of the {channels} output channels")]
    InvalidAnalysisChannel { channel: usize, channels: usize },

    #[error("unsupported bits per sample: {0}")]
    UnsupportedBitDepth(u16),

    #[error("a half buffer must carry at least 1 ms of audio")]
    EmptyChunk,

    #[error("volume level {0} is outside the gain table")]
    VolumeOutOfRange(u32),

    #[error("transform length {0} must be a power of two, at least 16")]
    InvalidTransformLength(usize),

    #[error("overlap {0} must be in [0, 1) and leave at least one new sample per frame")]
    InvalidOverlap(f32),

    #[error("invalid averaging parameter: {0}")]
    InvalidAveraging(String),

    #[error("high-pass corner {corner_hz} Hz is not below Nyquist for {sample_rate} Hz")]
    InvalidHighPass { corner_hz: f32, sample_rate: f32 },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ConfigError {
    pub fn resource_exhausted<S: Into<String>>(what: S) -> Self {
        Self::ResourceExhausted(what.into())
    }
}
