use core::f32::consts::PI;

use crate::error::{ConfigError, Result};

/// Number of taps in the half-band decimator
pub const HALF_BAND_TAPS: usize = 16;

/// Q15 coefficients of the 2:1 half-band decimator used in cascade mode.
/// Symmetric; they sum to 32766, so DC gain is just under unity.
pub const HALF_BAND_Q15: [i16; HALF_BAND_TAPS] = [
    -1406, 1634, -1943, 2386, -3080, 4325, -7223, 21690,
    21690, -7223, 4325, -3080, 2386, -1943, 1634, -1406,
];

/// Direct-form FIR filter over f32 samples with a fixed coefficient table
#[derive(Clone, Debug)]
pub struct FloatFir<const TAPS: usize> {
    coeffs: [f32; TAPS],
    samples: [f32; TAPS],
    pos: usize,
}

impl<const TAPS: usize> FloatFir<TAPS> {
    pub fn new(coeffs: [f32; TAPS]) -> Self {
        Self {
            coeffs,
            samples: [0.0; TAPS],
            pos: 0,
        }
    }

    pub fn process_sample(&mut self, sample: f32) -> f32 {
        // Newest sample lines up with coeffs[0]
        self.samples[self.pos] = sample;
        let mut total = 0.0;
        for i in 0..TAPS {
            let sample_idx = (self.pos + TAPS - i) % TAPS;
            total += self.coeffs[i] * self.samples[sample_idx];
        }
        self.pos = (self.pos + 1) % TAPS;
        total
    }

    pub fn coeffs(&self) -> &[f32; TAPS] {
        &self.coeffs
    }
}

/// Blackman-windowed sinc low-pass with unity DC gain.
///
/// `cutoff` is in cycles per sample, i.e. 0.25 puts the corner at half the
/// Nyquist frequency of the rate the filter runs at.
pub fn design_lowpass<const TAPS: usize>(cutoff: f32) -> [f32; TAPS] {
    assert!(cutoff > 0.0 && cutoff < 0.5);
    let mut coeffs = [0.0f32; TAPS];
    let m = (TAPS - 1) as f32;
    for (n, c) in coeffs.iter_mut().enumerate() {
        let t = n as f32 - m / 2.0;
        let sinc = if t == 0.0 {
            2.0 * cutoff
        } else {
            libm::sinf(2.0 * PI * cutoff * t) / (PI * t)
        };
        let phase = 2.0 * PI * n as f32 / m;
        let window = 0.42 - 0.5 * libm::cosf(phase) + 0.08 * libm::cosf(2.0 * phase);
        *c = sinc * window;
    }
    let dc: f32 = coeffs.iter().sum();
    for c in coeffs.iter_mut() {
        *c /= dc;
    }
    coeffs
}

/// Fixed-point FIR decimator by two over 16-bit PCM, for the rates the
/// primary filter can't reach on its own. One output per two inputs.
#[derive(Clone, Debug)]
pub struct HalfBandDecimator {
    delay: Vec<i16>,
    pos: usize,
    phase: usize,
}

impl HalfBandDecimator {
    pub fn new() -> Result<Self> {
        let mut delay = Vec::new();
        delay
            .try_reserve_exact(HALF_BAND_TAPS)
            .map_err(|_| ConfigError::resource_exhausted("half-band decimator delay line"))?;
        delay.resize(HALF_BAND_TAPS, 0);
        Ok(Self { delay, pos: 0, phase: 0 })
    }

    pub fn push_sample<F>(&mut self, sample: i16, mut output: F)
    where
        F: FnMut(i16),
    {
        self.delay[self.pos] = sample;
        let newest = self.pos;
        self.pos = (self.pos + 1) % HALF_BAND_TAPS;
        self.phase += 1;
        if self.phase < 2 {
            return;
        }
        self.phase = 0;

        let mut acc: i64 = 0;
        for (k, &coeff) in HALF_BAND_Q15.iter().enumerate() {
            let idx = (newest + HALF_BAND_TAPS - k) % HALF_BAND_TAPS;
            acc += coeff as i64 * self.delay[idx] as i64;
        }
        let y = (acc >> 15).clamp(i16::MIN as i64, i16::MAX as i64);
        output(y as i16);
    }
}
