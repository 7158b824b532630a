//! PDM microphone capture to averaged spectrum.
//!
//! The chain runs synchronously inside each capture notification:
//! [`buffer::PdmDoubleBuffer`] hands a completed half to a
//! [`buffer::CaptureHandler`], the [`pdm_processing::DecimationFilter`] turns
//! the bitstream into PCM, [`overlap::OverlapSaveAssembler`] builds transform
//! frames, [`fft::SpectrumAnalyzer`] windows and transforms them and
//! [`average::SpectralAverager`] keeps the running average a consumer reads.
//! Alongside, [`level::LevelMeter`] tracks the sound level of each chunk.
//! [`pipeline::SpectrumPipeline`] owns all of it.

pub mod average;
pub mod buffer;
pub mod cic;
pub mod config;
pub mod error;
pub mod fft;
pub mod fir;
#[cfg(feature = "generation")]
pub mod generation;
pub mod level;
pub mod overlap;
pub mod pdm_processing;
pub mod pipeline;
pub mod window;

pub use error::{ConfigError, Result};

// Simple moving average decimator
#[derive(Clone, Copy, Debug)]
pub struct Decimator<const DECIMATION: usize> {
    accum: f32,
    pos: usize,
}

impl<const DECIMATION: usize> Decimator<DECIMATION> {
    pub const fn new() -> Self {
        Self { accum: 0., pos: 0 }
    }

    pub fn process_sample<F>(&mut self, sample: f32, mut output: F)
    where
        F: FnMut(f32),
    {
        self.accum += sample;
        self.pos += 1;
        if self.pos == DECIMATION {
            self.pos = 0;
            output(self.accum / DECIMATION as f32);
            self.accum = 0.;
        }
    }
}

impl<const DECIMATION: usize> Default for Decimator<DECIMATION> {
    fn default() -> Self {
        Self::new()
    }
}
