use crate::error::{ConfigError, Result};

/// Only 16-bit PCM output is produced
pub const BITS_PER_SAMPLE: u16 = 16;
/// Upper bound on interleaved PDM input channels
pub const MAX_CHANNELS: usize = 8;
/// Volume level giving 0 dB of gain
pub const DEFAULT_VOLUME: u32 = 4;
/// Default corner of the DC-blocking high-pass
pub const DEFAULT_HIGH_PASS_HZ: f32 = 30.0;
/// Default amount of audio delivered per half buffer
pub const DEFAULT_MS_PER_CHUNK: u32 = 1;

/// Gain in dB for each volume level. Monotonic; level 4 is unity.
const VOLUME_GAIN_DB: [i16; 129] = [
    -12, -12, -6, -3, 0, 2, 3, 5, 6, 7, 8, 9, 9, 10, 11, 11,
    12, 12, 13, 13, 14, 14, 15, 15, 15, 16, 16, 17, 17, 17, 17, 18,
    18, 18, 19, 19, 19, 19, 19, 20, 20, 20, 20, 21, 21, 21, 21, 21,
    22, 22, 22, 22, 22, 22, 23, 23, 23, 23, 23, 23, 23, 24, 24, 24,
    24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 25, 25, 26, 26, 26,
    26, 26, 26, 26, 26, 26, 27, 27, 27, 27, 27, 27, 27, 27, 27, 27,
    28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 28, 29, 29, 29, 29,
    29, 29, 29, 29, 29, 29, 29, 29, 29, 30, 30, 30, 30, 30, 30, 30,
    31,
];

/// Map a volume level to a gain in dB
pub fn volume_to_db(level: u32) -> Result<i16> {
    VOLUME_GAIN_DB
        .get(level as usize)
        .copied()
        .ok_or(ConfigError::VolumeOutOfRange(level))
}

/// Which bit of a PDM byte was captured first
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    LsbFirst,
    MsbFirst,
}

/// Byte order of the 16-bit words the capture engine writes. `Big` swaps
/// every pair of bytes before the stream is demultiplexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Word order the capture engine uses for `channels` microphones: a single
    /// microphone fills both bytes of each 16-bit word and arrives big-endian,
    /// interleaved microphones arrive little-endian
    pub fn for_channels(channels: usize) -> Self {
        if channels == 1 {
            Self::Big
        } else {
            Self::Little
        }
    }
}

/// Supported decimation ratios. `R160` is not a native ratio of the primary
/// filter; it runs the primary stage at 80 followed by a 2:1 half-band stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecimationRatio {
    R16,
    R24,
    R32,
    R48,
    R64,
    R80,
    R128,
    R160,
}

impl DecimationRatio {
    pub fn from_factor(factor: u32) -> Result<Self> {
        Ok(match factor {
            16 => Self::R16,
            24 => Self::R24,
            32 => Self::R32,
            48 => Self::R48,
            64 => Self::R64,
            80 => Self::R80,
            128 => Self::R128,
            160 => Self::R160,
            other => return Err(ConfigError::UnsupportedRatio(other)),
        })
    }

    /// Overall ratio of PDM bit clock to PCM output rate
    pub fn factor(&self) -> u32 {
        match self {
            Self::R160 => 160,
            other => other.primary_factor(),
        }
    }

    /// Ratio applied by the primary (CIC + FIR) stage
    pub fn primary_factor(&self) -> u32 {
        match self {
            Self::R16 => 16,
            Self::R24 => 24,
            Self::R32 => 32,
            Self::R48 => 48,
            Self::R64 => 64,
            Self::R80 => 80,
            Self::R128 => 128,
            Self::R160 => 80,
        }
    }

    pub fn is_cascade(&self) -> bool {
        matches!(self, Self::R160)
    }
}

/// Output rates the capture path can be configured for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleRate {
    Hz8000,
    Hz16000,
    Hz32000,
    Hz48000,
}

impl SampleRate {
    pub fn from_hz(hz: u32) -> Result<Self> {
        match hz {
            8_000 => Ok(Self::Hz8000),
            16_000 => Ok(Self::Hz16000),
            32_000 => Ok(Self::Hz32000),
            48_000 => Ok(Self::Hz48000),
            other => Err(ConfigError::UnsupportedSampleRate(other)),
        }
    }

    pub fn hz(&self) -> u32 {
        match self {
            Self::Hz8000 => 8_000,
            Self::Hz16000 => 16_000,
            Self::Hz32000 => 32_000,
            Self::Hz48000 => 48_000,
        }
    }

    /// PDM bit clock the microphone is driven at for this output rate
    pub fn pdm_clock_hz(&self) -> u32 {
        match self {
            Self::Hz8000 | Self::Hz16000 => 1_280_000,
            Self::Hz32000 => 2_048_000,
            Self::Hz48000 => 3_072_000,
        }
    }

    pub fn decimation(&self) -> DecimationRatio {
        match self {
            Self::Hz8000 => DecimationRatio::R160,
            Self::Hz16000 => DecimationRatio::R80,
            Self::Hz32000 | Self::Hz48000 => DecimationRatio::R64,
        }
    }
}

/// Capture session parameters. Immutable once the pipeline is built; a change
/// means tearing the pipeline down and building a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConfig {
    /// Requested PCM output rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved microphones in the bitstream
    pub channels: usize,
    pub bits_per_sample: u16,
    /// Initial volume level, see [`volume_to_db`]
    pub volume: u32,
    /// Milliseconds of audio carried by each half buffer
    pub ms_per_chunk: u32,
    pub bit_order: BitOrder,
    /// See [`ByteOrder::for_channels`]; set it again when changing `channels`
    pub byte_order: ByteOrder,
    /// Corner of the DC-blocking high-pass, or `None` to disable it
    pub high_pass_hz: Option<f32>,
    /// Which output channel feeds the spectrum stage
    pub analysis_channel: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let channels = 1;
        Self {
            sample_rate: 16_000,
            channels,
            bits_per_sample: BITS_PER_SAMPLE,
            volume: DEFAULT_VOLUME,
            ms_per_chunk: DEFAULT_MS_PER_CHUNK,
            bit_order: BitOrder::LsbFirst,
            byte_order: ByteOrder::for_channels(channels),
            high_pass_hz: Some(DEFAULT_HIGH_PASS_HZ),
            analysis_channel: 0,
        }
    }
}

impl CaptureConfig {
    /// Default session for `channels` interleaved microphones
    pub fn with_channels(channels: usize) -> Self {
        Self {
            channels,
            byte_order: ByteOrder::for_channels(channels),
            ..Default::default()
        }
    }

    /// Check every field and resolve the sample rate
    pub fn validate(&self) -> Result<SampleRate> {
        let rate = SampleRate::from_hz(self.sample_rate)?;
        if self.bits_per_sample != BITS_PER_SAMPLE {
            return Err(ConfigError::UnsupportedBitDepth(self.bits_per_sample));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidChannelCount {
                channels_in: self.channels,
                channels_out: self.channels,
            });
        }
        if self.analysis_channel >= self.channels {
            return Err(ConfigError::InvalidAnalysisChannel {
                channel: self.analysis_channel,
                channels: self.channels,
            });
        }
        if self.ms_per_chunk == 0 {
            return Err(ConfigError::EmptyChunk);
        }
        volume_to_db(self.volume)?;
        Ok(rate)
    }

    /// PCM frames produced from one half buffer
    pub fn samples_per_chunk(&self) -> Result<usize> {
        let rate = self.validate()?;
        Ok((rate.hz() / 1000 * self.ms_per_chunk) as usize)
    }

    /// Size in bytes of one half buffer of raw PDM
    pub fn bytes_per_chunk(&self) -> Result<usize> {
        let rate = self.validate()?;
        let bits_per_channel = rate.pdm_clock_hz() / 1000 * self.ms_per_chunk;
        Ok(bits_per_channel as usize / 8 * self.channels)
    }
}
