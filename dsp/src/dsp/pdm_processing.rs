use biquad::{Biquad, Coefficients, DirectForm2Transposed, Hertz, Type, Q_BUTTERWORTH_F32};
use log::{debug, info};

use crate::cic::CicFilter;
use crate::config::{volume_to_db, BitOrder, ByteOrder, CaptureConfig, DecimationRatio, MAX_CHANNELS};
use crate::error::{ConfigError, Result};
use crate::fir::{design_lowpass, FloatFir, HalfBandDecimator};
use crate::Decimator;

/// Order of the CIC stage
const CIC_ORDER: usize = 4;
/// Taps of the low-pass run between the CIC and the final 2:1 decimation
pub const LOWPASS_TAPS: usize = 64;
/// Low-pass corner in cycles per sample at the CIC output rate. The final
/// decimation by two folds everything above 0.25 back into band.
const LOWPASS_CUTOFF: f32 = 0.225;
/// Scale applied to a +/-1.0 sample to reach i16 full scale
const PCM_FULL_SCALE: f32 = 32767.0;

/// Filter state for one microphone
struct ChannelFilter {
    cic: CicFilter<CIC_ORDER>,
    fir: FloatFir<LOWPASS_TAPS>,
    dec: Decimator<2>,
    high_pass: Option<DirectForm2Transposed<f32>>,
    half_band: Option<HalfBandDecimator>,
}

impl ChannelFilter {
    fn new(ratio: DecimationRatio, lowpass: [f32; LOWPASS_TAPS]) -> Result<Self> {
        let half_band = if ratio.is_cascade() {
            Some(HalfBandDecimator::new()?)
        } else {
            None
        };
        Ok(Self {
            cic: CicFilter::new(ratio.primary_factor() as usize / 2),
            fir: FloatFir::new(lowpass),
            dec: Decimator::new(),
            high_pass: None,
            half_band,
        })
    }
}

/// Converts interleaved 1-bit PDM channels into interleaved 16-bit PCM.
///
/// Per channel: CIC (ratio / 2) -> normalise to +/-1.0 -> 64-tap low-pass ->
/// 2:1 average -> optional DC-blocking high-pass -> gain -> saturate to i16.
/// In cascade mode (ratio 160) the primary stage runs at 80 and a Q15
/// half-band decimator halves its output.
///
/// All state carries across calls to [`DecimationFilter::process`], so chunks
/// of any whole number of input frames can be fed.
pub struct DecimationFilter {
    ratio: DecimationRatio,
    channels_in: usize,
    channels_out: usize,
    bit_order: BitOrder,
    byte_order: ByteOrder,
    gain_db: f32,
    scale: f32,
    channels: Vec<ChannelFilter>,
}

impl DecimationFilter {
    pub fn configure(
        ratio: u32,
        channels_in: usize,
        channels_out: usize,
        bit_order: BitOrder,
        gain_db: f32,
    ) -> Result<Self> {
        let ratio = DecimationRatio::from_factor(ratio)?;
        if channels_in == 0
            || channels_in > MAX_CHANNELS
            || channels_out == 0
            || channels_out > channels_in
        {
            return Err(ConfigError::InvalidChannelCount { channels_in, channels_out });
        }

        let lowpass = design_lowpass::<LOWPASS_TAPS>(LOWPASS_CUTOFF);
        let mut channels = Vec::new();
        channels
            .try_reserve_exact(channels_out)
            .map_err(|_| ConfigError::resource_exhausted("decimation filter channels"))?;
        for _ in 0..channels_out {
            channels.push(ChannelFilter::new(ratio, lowpass)?);
        }

        info!(
            "Decimation filter: ratio {} ({}), {} of {} channels, {:?}",
            ratio.factor(),
            if ratio.is_cascade() { "80 + 2:1 half-band" } else { "primary only" },
            channels_out,
            channels_in,
            bit_order,
        );

        Ok(Self {
            ratio,
            channels_in,
            channels_out,
            bit_order,
            byte_order: ByteOrder::Little,
            gain_db,
            scale: db_to_scale(gain_db),
            channels,
        })
    }

    /// Build the filter a capture session needs, high-pass included
    pub fn from_capture(config: &CaptureConfig) -> Result<Self> {
        let rate = config.validate()?;
        let gain_db = volume_to_db(config.volume)? as f32;
        let filter = Self::configure(
            rate.decimation().factor(),
            config.channels,
            config.channels,
            config.bit_order,
            gain_db,
        )?
        .with_byte_order(config.byte_order);
        match config.high_pass_hz {
            Some(corner_hz) => filter.with_high_pass(corner_hz, rate.hz() as f32),
            None => Ok(filter),
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Enable a Butterworth high-pass at `corner_hz`. It runs at the primary
    /// stage rate, which is twice `output_rate_hz` in cascade mode.
    pub fn with_high_pass(mut self, corner_hz: f32, output_rate_hz: f32) -> Result<Self> {
        let primary_rate = if self.ratio.is_cascade() {
            output_rate_hz * 2.0
        } else {
            output_rate_hz
        };
        let invalid = ConfigError::InvalidHighPass { corner_hz, sample_rate: primary_rate };
        if !(corner_hz > 0.0) || corner_hz >= primary_rate / 2.0 {
            return Err(invalid);
        }
        let fs = Hertz::<f32>::from_hz(primary_rate).map_err(|_| invalid.clone())?;
        let f0 = Hertz::<f32>::from_hz(corner_hz).map_err(|_| invalid.clone())?;
        let coeffs = Coefficients::<f32>::from_params(Type::HighPass, fs, f0, Q_BUTTERWORTH_F32)
            .map_err(|_| invalid)?;
        for ch in self.channels.iter_mut() {
            ch.high_pass = Some(DirectForm2Transposed::<f32>::new(coeffs));
        }
        info!("High-pass at {} Hz (fs {} Hz)", corner_hz, primary_rate);
        Ok(self)
    }

    pub fn ratio(&self) -> DecimationRatio {
        self.ratio
    }

    pub fn channels_in(&self) -> usize {
        self.channels_in
    }

    pub fn channels_out(&self) -> usize {
        self.channels_out
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Takes effect from the next chunk
    pub fn set_gain_db(&mut self, gain_db: f32) {
        debug!("Gain set to {} dB", gain_db);
        self.gain_db = gain_db;
        self.scale = db_to_scale(gain_db);
    }

    pub fn set_volume(&mut self, level: u32) -> Result<()> {
        let db = volume_to_db(level)?;
        debug!("Volume level {} -> {} dB", level, db);
        self.set_gain_db(db as f32);
        Ok(())
    }

    /// PCM frames produced from a chunk of `chunk_len` bytes
    pub fn output_frames(&self, chunk_len: usize) -> usize {
        chunk_len / self.channels_in * 8 / self.ratio.factor() as usize
    }

    /// Decimate one chunk of interleaved PDM into `out`, interleaved with
    /// `channels_out` samples per frame. Returns the number of frames written,
    /// which is at most `out.len() / channels_out`. Frames that do not fit are
    /// dropped, though the filter state still advances over them.
    pub fn process(&mut self, raw: &[u8], out: &mut [i16]) -> usize {
        debug_assert!(raw.len() % self.channels_in == 0);
        debug_assert!(self.byte_order == ByteOrder::Little || raw.len() % 2 == 0);

        let n_frames = raw.len() / self.channels_in;
        let channels_in = self.channels_in;
        let channels_out = self.channels_out;
        let bit_order = self.bit_order;
        let swap = match self.byte_order {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        };
        let scale = self.scale;
        let capacity = out.len() / channels_out;
        let mut written = 0;

        for (ch, filter) in self.channels.iter_mut().enumerate() {
            let ChannelFilter { cic, fir, dec, high_pass, half_band } = filter;
            let full_scale = cic.full_scale();
            let mut pos = 0usize;
            let mut emit = |sample: i16| {
                if pos < capacity {
                    out[pos * channels_out + ch] = sample;
                    pos += 1;
                }
            };
            for frame in 0..n_frames {
                let byte = raw[(frame * channels_in + ch) ^ swap];
                cic.push_byte(byte, bit_order, |x| {
                    let lowpassed = fir.process_sample(x as f32 / full_scale);
                    dec.process_sample(lowpassed, |y| {
                        let y = match high_pass.as_mut() {
                            Some(hp) => hp.run(y),
                            None => y,
                        };
                        let pcm = saturate(y * scale);
                        match half_band.as_mut() {
                            Some(hb) => hb.push_sample(pcm, &mut emit),
                            None => emit(pcm),
                        }
                    });
                });
            }
            written = pos;
        }
        written
    }
}

fn db_to_scale(gain_db: f32) -> f32 {
    PCM_FULL_SCALE * libm::powf(10.0, gain_db / 20.0)
}

fn saturate(x: f32) -> i16 {
    // `as` saturates float to int conversions
    x as i16
}
