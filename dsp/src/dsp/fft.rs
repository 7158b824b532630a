use std::sync::Arc;

use log::{info, warn};
use num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{ConfigError, Result};
use crate::overlap::validate_transform_length;
use crate::window::{Window, WindowKind};

pub trait FftProcessor {
    fn len(&self) -> usize;

    /// Unnormalised forward real FFT of `data` into `len / 2 + 1` bins. A
    /// full-scale sine centred on bin k reads `len / 2` there. `data` is used
    /// as scratch.
    fn process(&mut self, data: &mut [f32], output: &mut [Complex<f32>]);

    /// Inverse of [`FftProcessor::process`], scaled by `1 / len` so the pair
    /// round-trips. `input` is used as scratch.
    fn inverse(&mut self, input: &mut [Complex<f32>], output: &mut [f32]);
}

/// realfft backed transform with forward and inverse plans and preallocated
/// scratch. Planning is the expensive part, so build one per transform length
/// and keep it.
pub struct Fft {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl Fft {
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();
        Self { forward, inverse, forward_scratch, inverse_scratch }
    }
}

impl FftProcessor for Fft {
    fn len(&self) -> usize {
        self.forward.len()
    }

    fn process(&mut self, data: &mut [f32], output: &mut [Complex<f32>]) {
        debug_assert_eq!(data.len(), self.forward.len());
        debug_assert_eq!(output.len(), self.forward.len() / 2 + 1);

        if let Err(e) = self.forward.process_with_scratch(data, output, &mut self.forward_scratch) {
            warn!("Forward FFT failed: {}", e);
            output.fill(Complex::new(0.0, 0.0));
        }
    }

    fn inverse(&mut self, input: &mut [Complex<f32>], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.inverse.len() / 2 + 1);
        debug_assert_eq!(output.len(), self.inverse.len());

        // DC and Nyquist bins of a real signal have no imaginary part
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = input.last_mut() {
            last.im = 0.0;
        }
        if let Err(e) = self.inverse.process_with_scratch(input, output, &mut self.inverse_scratch) {
            warn!("Inverse FFT failed: {}", e);
            output.fill(0.0);
            return;
        }
        let scale = 1.0 / self.inverse.len() as f32;
        for x in output.iter_mut() {
            *x *= scale;
        }
    }
}

/// What the analyzer publishes for each frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputKind {
    Complex,
    #[default]
    Magnitude,
    Phase,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FftConfig {
    /// Power of two, at least 16
    pub transform_length: usize,
    pub window: WindowKind,
    pub output: OutputKind,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            transform_length: 1024,
            window: WindowKind::Hanning,
            output: OutputKind::Magnitude,
        }
    }
}

impl FftConfig {
    pub fn validate(&self) -> Result<()> {
        validate_transform_length(self.transform_length)
    }

    /// Bins from DC to Nyquist inclusive
    pub fn bins(&self) -> usize {
        self.transform_length / 2 + 1
    }
}

/// Borrowed view of the latest transform in the configured form
#[derive(Debug)]
pub enum SpectrumOutput<'a> {
    Complex(&'a [Complex<f32>]),
    Magnitude(&'a [f32]),
    Phase(&'a [f32]),
}

/// Windows a frame and transforms it. Magnitudes are always kept since the
/// averager consumes them; phase is only computed when asked for.
pub struct SpectrumAnalyzer<P: FftProcessor = Fft> {
    window: Window,
    fft: P,
    kind: OutputKind,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    magnitude: Vec<f32>,
    phase: Vec<f32>,
}

impl SpectrumAnalyzer<Fft> {
    pub fn new(config: &FftConfig) -> Result<Self> {
        config.validate()?;
        Self::with_processor(config, Fft::new(config.transform_length))
    }
}

impl<P: FftProcessor> SpectrumAnalyzer<P> {
    pub fn with_processor(config: &FftConfig, fft: P) -> Result<Self> {
        config.validate()?;
        if fft.len() != config.transform_length {
            return Err(ConfigError::InvalidTransformLength(fft.len()));
        }
        let len = config.transform_length;
        let bins = config.bins();
        let phase_len = if config.output == OutputKind::Phase { bins } else { 0 };
        info!(
            "Spectrum analyzer: {} point FFT, {:?} window, {:?} output",
            len, config.window, config.output
        );
        Ok(Self {
            window: Window::new(config.window, len)?,
            fft,
            kind: config.output,
            input: alloc_zeroed(len, 0.0)?,
            spectrum: alloc_zeroed(bins, Complex::new(0.0, 0.0))?,
            magnitude: alloc_zeroed(bins, 0.0)?,
            phase: alloc_zeroed(phase_len, 0.0)?,
        })
    }

    pub fn transform_length(&self) -> usize {
        self.input.len()
    }

    pub fn bins(&self) -> usize {
        self.spectrum.len()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Window and transform one frame of `T` samples
    pub fn analyze(&mut self, frame: &[f32]) {
        self.input.copy_from_slice(frame);
        self.window.apply(&mut self.input);
        self.fft.process(&mut self.input, &mut self.spectrum);
        for (m, bin) in self.magnitude.iter_mut().zip(self.spectrum.iter()) {
            *m = bin.norm();
        }
        if self.kind == OutputKind::Phase {
            for (p, bin) in self.phase.iter_mut().zip(self.spectrum.iter()) {
                *p = libm::atan2f(bin.im, bin.re);
            }
        }
    }

    pub fn spectrum(&self) -> &[Complex<f32>] {
        &self.spectrum
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitude
    }

    pub fn output(&self) -> SpectrumOutput<'_> {
        match self.kind {
            OutputKind::Complex => SpectrumOutput::Complex(&self.spectrum),
            OutputKind::Magnitude => SpectrumOutput::Magnitude(&self.magnitude),
            OutputKind::Phase => SpectrumOutput::Phase(&self.phase),
        }
    }
}

fn alloc_zeroed<T: Clone>(len: usize, zero: T) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ConfigError::resource_exhausted("spectrum analyzer buffers"))?;
    v.resize(len, zero);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::PI;

    fn rect(len: usize, output: OutputKind) -> FftConfig {
        FftConfig { transform_length: len, window: WindowKind::Rectangular, output }
    }

    #[test]
    fn round_trip_reproduces_input() {
        for len in [16, 256, 1024] {
            let mut fft = Fft::new(len);
            let signal: Vec<f32> = (0..len)
                .map(|n| libm::sinf(0.37 * n as f32) + 0.25 * libm::cosf(1.9 * n as f32) - 0.1)
                .collect();
            let mut data = signal.clone();
            let mut bins = vec![Complex::new(0.0, 0.0); len / 2 + 1];
            let mut back = vec![0.0; len];
            fft.process(&mut data, &mut bins);
            fft.inverse(&mut bins, &mut back);
            for (a, b) in signal.iter().zip(back.iter()) {
                assert!((a - b).abs() < 1e-4, "len {}: {} vs {}", len, a, b);
            }
        }
    }

    #[test]
    fn bin_centred_cosine_reads_half_length_times_amplitude() {
        let len = 64;
        let mut analyzer = SpectrumAnalyzer::new(&rect(len, OutputKind::Magnitude)).unwrap();
        let frame: Vec<f32> = (0..len).map(|n| 0.8 * libm::cosf(2.0 * PI * 5.0 * n as f32 / len as f32)).collect();
        analyzer.analyze(&frame);
        let mags = match analyzer.output() {
            SpectrumOutput::Magnitude(m) => m.to_vec(),
            other => panic!("unexpected output {:?}", other),
        };
        assert_eq!(mags.len(), 33);
        // 0.8 * 64 / 2
        assert!((mags[5] - 25.6).abs() < 1e-3, "bin 5 = {}", mags[5]);
        for (k, m) in mags.iter().enumerate() {
            if k != 5 {
                assert!(*m < 1e-3, "bin {} = {}", k, m);
            }
        }
    }

    #[test]
    fn dc_lands_in_bin_zero() {
        let mut analyzer = SpectrumAnalyzer::new(&rect(32, OutputKind::Complex)).unwrap();
        analyzer.analyze(&[0.5; 32]);
        match analyzer.output() {
            SpectrumOutput::Complex(bins) => {
                assert!((bins[0].re - 16.0).abs() < 1e-4);
                assert!(bins[1..].iter().all(|b| b.norm() < 1e-4));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn all_ones_frame_sums_into_dc() {
        let mut analyzer = SpectrumAnalyzer::new(&rect(1024, OutputKind::Magnitude)).unwrap();
        analyzer.analyze(&[1.0; 1024]);
        assert!((analyzer.magnitudes()[0] - 1024.0).abs() < 1e-2);
    }

    #[test]
    fn phase_of_sine_is_minus_half_pi() {
        let len = 128;
        let mut analyzer = SpectrumAnalyzer::new(&rect(len, OutputKind::Phase)).unwrap();
        let frame: Vec<f32> = (0..len).map(|n| libm::sinf(2.0 * PI * 8.0 * n as f32 / len as f32)).collect();
        analyzer.analyze(&frame);
        match analyzer.output() {
            SpectrumOutput::Phase(phase) => assert!((phase[8] + PI / 2.0).abs() < 1e-3),
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn silence_gives_zero_spectrum() {
        let config = FftConfig { transform_length: 256, ..Default::default() };
        let mut analyzer = SpectrumAnalyzer::new(&config).unwrap();
        analyzer.analyze(&[0.0; 256]);
        assert!(analyzer.magnitudes().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn window_is_applied_before_transform() {
        let config = FftConfig { transform_length: 64, window: WindowKind::Hanning, output: OutputKind::Magnitude };
        let mut analyzer = SpectrumAnalyzer::new(&config).unwrap();
        analyzer.analyze(&[1.0; 64]);
        // DC of a windowed constant is the window sum, just under T / 2
        let expected: f32 = analyzer.window().table().iter().sum();
        assert!((analyzer.magnitudes()[0] - expected).abs() < 1e-4);
        assert!(expected < 32.0);
    }

    #[test]
    fn length_must_be_power_of_two() {
        let config = FftConfig { transform_length: 48, ..Default::default() };
        assert_eq!(SpectrumAnalyzer::new(&config).err(), Some(ConfigError::InvalidTransformLength(48)));
    }
}
