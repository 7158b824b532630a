//! Synthetic PDM bitstreams for tests and offline experiments.

use core::f32::consts::PI;

use crate::config::{BitOrder, ByteOrder};

/// A continuous-valued signal sampled at the PDM bit clock, nominally within
/// [-1, 1]
pub trait SampleSource {
    fn next_sample(&mut self) -> f32;
}

pub struct ToneSource {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl ToneSource {
    /// Sine of `frequency` Hz at a sample rate of `bit_clock` Hz
    pub fn new(frequency: f32, amplitude: f32, bit_clock: f32) -> Self {
        Self {
            phase: 0.0,
            step: 2.0 * PI * frequency / bit_clock,
            amplitude,
        }
    }
}

impl SampleSource for ToneSource {
    fn next_sample(&mut self) -> f32 {
        let x = self.amplitude * libm::sinf(self.phase);
        self.phase += self.step;
        if self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        x
    }
}

pub struct WhiteNoiseSource {
    amplitude: f32,
}

impl WhiteNoiseSource {
    pub fn new(amplitude: f32) -> Self {
        Self { amplitude }
    }
}

impl SampleSource for WhiteNoiseSource {
    fn next_sample(&mut self) -> f32 {
        // Uniform over (-1, 1)
        let rand_sample: f32 = rand::random::<f32>() * 2.0 - 1.0;
        rand_sample * self.amplitude
    }
}

/// Constant level, e.g. 0.0 for an idle microphone
pub struct DcSource(pub f32);

impl SampleSource for DcSource {
    fn next_sample(&mut self) -> f32 {
        self.0
    }
}

/// Second order sigma-delta modulator. Stable for inputs up to roughly
/// +/-0.7.
#[derive(Clone, Copy, Debug, Default)]
pub struct SigmaDeltaModulator {
    integrator1: f32,
    integrator2: f32,
    feedback: f32,
}

impl SigmaDeltaModulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_bit(&mut self, x: f32) -> bool {
        self.integrator1 += x - self.feedback;
        self.integrator2 += self.integrator1 - self.feedback;
        let bit = self.integrator2 >= 0.0;
        self.feedback = if bit { 1.0 } else { -1.0 };
        bit
    }
}

/// Encodes one or more sources into an interleaved PDM byte stream laid out
/// the way the capture engine delivers it
pub struct PdmSource {
    channels: Vec<(Box<dyn SampleSource + Send>, SigmaDeltaModulator)>,
    bit_order: BitOrder,
    byte_order: ByteOrder,
}

impl PdmSource {
    pub fn new(bit_order: BitOrder, byte_order: ByteOrder) -> Self {
        Self { channels: Vec::new(), bit_order, byte_order }
    }

    pub fn with_channel<S>(mut self, source: S) -> Self
    where
        S: SampleSource + Send + 'static,
    {
        self.channels.push((Box::new(source), SigmaDeltaModulator::new()));
        self
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Fill `out` with whole frames of one byte per channel
    pub fn fill(&mut self, out: &mut [u8]) {
        let n_chan = self.channels.len();
        assert!(n_chan > 0, "PdmSource has no channels");
        debug_assert!(out.len() % n_chan == 0);
        for frame in out.chunks_mut(n_chan) {
            for (byte, (source, modulator)) in frame.iter_mut().zip(self.channels.iter_mut()) {
                let mut value = 0u8;
                for i in 0..8 {
                    if modulator.next_bit(source.next_sample()) {
                        let bit = match self.bit_order {
                            BitOrder::LsbFirst => i,
                            BitOrder::MsbFirst => 7 - i,
                        };
                        value |= 1 << bit;
                    }
                }
                *byte = value;
            }
        }
        if self.byte_order == ByteOrder::Big {
            for pair in out.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
    }

    pub fn next_chunk(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn density(bytes: &[u8]) -> f32 {
        let ones: u32 = bytes.iter().map(|b| b.count_ones()).sum();
        ones as f32 / (bytes.len() * 8) as f32
    }

    #[test]
    fn bit_density_tracks_level() {
        for level in [-0.5f32, 0.0, 0.25, 0.6] {
            let mut source = PdmSource::new(BitOrder::LsbFirst, ByteOrder::Little).with_channel(DcSource(level));
            let bytes = source.next_chunk(4096);
            let expected = (level + 1.0) / 2.0;
            assert!((density(&bytes) - expected).abs() < 0.01, "level {}", level);
        }
    }

    #[test]
    fn channels_are_interleaved() {
        let mut source = PdmSource::new(BitOrder::LsbFirst, ByteOrder::Little)
            .with_channel(DcSource(0.6))
            .with_channel(DcSource(-0.6));
        let bytes = source.next_chunk(2048);
        let ch0: Vec<u8> = bytes.iter().step_by(2).copied().collect();
        let ch1: Vec<u8> = bytes.iter().skip(1).step_by(2).copied().collect();
        assert!(density(&ch0) > 0.75);
        assert!(density(&ch1) < 0.25);
    }

    #[test]
    fn bit_order_mirrors_bytes() {
        let mut lsb = PdmSource::new(BitOrder::LsbFirst, ByteOrder::Little).with_channel(ToneSource::new(1000.0, 0.5, 1_024_000.0));
        let mut msb = PdmSource::new(BitOrder::MsbFirst, ByteOrder::Little).with_channel(ToneSource::new(1000.0, 0.5, 1_024_000.0));
        let a = lsb.next_chunk(256);
        let b = msb.next_chunk(256);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.reverse_bits(), *y);
        }
    }

    #[test]
    fn noise_stays_in_range() {
        let mut noise = WhiteNoiseSource::new(0.3);
        for _ in 0..1000 {
            assert!(noise.next_sample().abs() <= 0.3);
        }
    }
}
