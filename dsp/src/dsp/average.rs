//! Spectral averaging and the lock-free snapshot a consumer reads it through.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use crate::error::{ConfigError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum AveragingMode {
    /// `avg += (new - avg) / count` over every update since the last reset
    #[default]
    RunningMean,
    /// `avg += alpha * (new - avg)`; the first update seeds the average
    Exponential { alpha: f32 },
    /// Running mean over `length` updates. The result is published when the
    /// block completes and the accumulator starts over.
    Block { length: u32 },
}

impl AveragingMode {
    /// Block mode publishing about once every `seconds`, given how many new
    /// samples each transform consumes
    pub fn block_for_duration(seconds: f32, sample_rate: u32, new_count: usize) -> Self {
        let frames = libm::roundf(seconds * sample_rate as f32 / new_count as f32);
        Self::Block { length: (frames as u32).max(1) }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::RunningMean => Ok(()),
            Self::Exponential { alpha } if alpha > 0.0 && alpha <= 1.0 => Ok(()),
            Self::Exponential { alpha } => Err(ConfigError::InvalidAveraging(format!(
                "exponential alpha {} must be in (0, 1]",
                alpha
            ))),
            Self::Block { length: 0 } => {
                Err(ConfigError::InvalidAveraging("block length must be at least 1".into()))
            }
            Self::Block { .. } => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AverageState {
    /// No update since construction or the last reset
    Empty,
    Warm,
}

struct SharedSpectrum {
    /// f32 bit patterns
    bins: Box<[AtomicU32]>,
    publications: AtomicU64,
}

impl SharedSpectrum {
    fn publish(&self, values: &[f32]) {
        for (bin, v) in self.bins.iter().zip(values.iter()) {
            bin.store(v.to_bits(), Ordering::Relaxed);
        }
        self.publications.fetch_add(1, Ordering::Release);
    }
}

/// Read side of the averaged spectrum, safe to use from another thread while
/// the averager keeps updating. A read may mix bins from two consecutive
/// publications, but each bin is always a value that was published.
#[derive(Clone)]
pub struct SpectrumReader {
    shared: Arc<SharedSpectrum>,
}

impl SpectrumReader {
    pub fn len(&self) -> usize {
        self.shared.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.bins.is_empty()
    }

    /// Number of times the spectrum has been published. Changes when new
    /// data is available.
    pub fn publications(&self) -> u64 {
        self.shared.publications.load(Ordering::Acquire)
    }

    /// Copy the spectrum into `out` and return the publication count seen
    /// before reading it
    pub fn read_into(&self, out: &mut [f32]) -> u64 {
        let seen = self.publications();
        for (o, bin) in out.iter_mut().zip(self.shared.bins.iter()) {
            *o = f32::from_bits(bin.load(Ordering::Relaxed));
        }
        seen
    }

    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.read_into(&mut out);
        out
    }
}

/// Averages magnitude spectra of `bins` bins
pub struct SpectralAverager {
    mode: AveragingMode,
    accum: Vec<f32>,
    count: u32,
    state: AverageState,
    shared: Arc<SharedSpectrum>,
}

impl SpectralAverager {
    pub fn new(bins: usize, mode: AveragingMode) -> Result<Self> {
        mode.validate()?;
        let mut accum = Vec::new();
        accum
            .try_reserve_exact(bins)
            .map_err(|_| ConfigError::resource_exhausted("spectral accumulator"))?;
        accum.resize(bins, 0.0);
        let shared = Arc::new(SharedSpectrum {
            bins: (0..bins).map(|_| AtomicU32::new(0)).collect(),
            publications: AtomicU64::new(0),
        });
        Ok(Self { mode, accum, count: 0, state: AverageState::Empty, shared })
    }

    pub fn mode(&self) -> AveragingMode {
        self.mode
    }

    pub fn state(&self) -> AverageState {
        self.state
    }

    /// Updates folded into the current average
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reader(&self) -> SpectrumReader {
        SpectrumReader { shared: self.shared.clone() }
    }

    /// Current accumulator. In block mode this is the partial block; the
    /// completed one is in [`SpectralAverager::snapshot`].
    pub fn average(&self) -> &[f32] {
        &self.accum
    }

    /// Latest published spectrum
    pub fn snapshot(&self) -> Vec<f32> {
        self.reader().snapshot()
    }

    pub fn update(&mut self, magnitudes: &[f32]) {
        debug_assert_eq!(magnitudes.len(), self.accum.len());
        self.count = self.count.saturating_add(1);
        self.state = AverageState::Warm;

        match self.mode {
            AveragingMode::RunningMean => {
                running_mean(&mut self.accum, magnitudes, self.count);
                self.shared.publish(&self.accum);
            }
            AveragingMode::Exponential { alpha } => {
                let alpha = if self.count == 1 { 1.0 } else { alpha };
                for (avg, &x) in self.accum.iter_mut().zip(magnitudes.iter()) {
                    *avg += alpha * (x - *avg);
                }
                self.shared.publish(&self.accum);
            }
            AveragingMode::Block { length } => {
                running_mean(&mut self.accum, magnitudes, self.count);
                if self.count >= length {
                    trace!("Block of {} spectra complete", length);
                    self.shared.publish(&self.accum);
                    self.count = 0;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        debug!("Spectral average reset after {} updates", self.count);
        self.accum.fill(0.0);
        self.count = 0;
        self.state = AverageState::Empty;
        self.shared.publish(&self.accum);
    }
}

fn running_mean(accum: &mut [f32], new: &[f32], count: u32) {
    let n = count as f32;
    for (avg, &x) in accum.iter_mut().zip(new.iter()) {
        *avg += (x - *avg) / n;
    }
}
