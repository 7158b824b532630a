use log::info;

use crate::error::{ConfigError, Result};

/// Smallest transform length accepted
pub const MIN_TRANSFORM_LENGTH: usize = 16;
/// PCM full scale used to normalise samples to [-1, 1)
const PCM_NORM: f32 = 32768.0;

pub fn validate_transform_length(len: usize) -> Result<()> {
    if len < MIN_TRANSFORM_LENGTH || !len.is_power_of_two() {
        return Err(ConfigError::InvalidTransformLength(len));
    }
    Ok(())
}

/// Collects PCM into transform-length frames that overlap by a fixed
/// fraction.
///
/// The first frame is emitted once `T` samples have arrived. After each frame
/// the trailing `round(overlap * T)` samples are kept at the front of the
/// buffer and the next frame fires after `T - retained` more samples.
pub struct OverlapSaveAssembler {
    frame: Vec<f32>,
    retained: usize,
    fill: usize,
}

impl OverlapSaveAssembler {
    pub fn new(transform_length: usize, overlap: f32) -> Result<Self> {
        validate_transform_length(transform_length)?;
        if !(0.0..1.0).contains(&overlap) {
            return Err(ConfigError::InvalidOverlap(overlap));
        }
        let retained = libm::roundf(overlap * transform_length as f32) as usize;
        if retained >= transform_length {
            return Err(ConfigError::InvalidOverlap(overlap));
        }

        let mut frame = Vec::new();
        frame
            .try_reserve_exact(transform_length)
            .map_err(|_| ConfigError::resource_exhausted("overlap-save frame"))?;
        frame.resize(transform_length, 0.0);

        info!(
            "Frame assembler: T={}, retaining {} and taking {} new samples per frame",
            transform_length,
            retained,
            transform_length - retained
        );
        Ok(Self { frame, retained, fill: 0 })
    }

    pub fn transform_length(&self) -> usize {
        self.frame.len()
    }

    /// Samples carried from one frame into the next
    pub fn retained(&self) -> usize {
        self.retained
    }

    /// Fresh samples between frames once warmed up
    pub fn new_count(&self) -> usize {
        self.frame.len() - self.retained
    }

    /// Valid samples currently held
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Append mono PCM. Calls `on_frame` with each complete frame and returns
    /// how many were emitted.
    pub fn feed<F>(&mut self, samples: &[i16], on_frame: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        self.feed_interleaved(samples, 1, 0, on_frame)
    }

    /// Append one channel of interleaved PCM. Nothing is taken when `channel`
    /// is not below `channels`.
    pub fn feed_interleaved<F>(
        &mut self,
        samples: &[i16],
        channels: usize,
        channel: usize,
        mut on_frame: F,
    ) -> usize
    where
        F: FnMut(&[f32]),
    {
        if channel >= channels {
            return 0;
        }
        let len = self.frame.len();
        let mut frames = 0;
        for &sample in samples.iter().skip(channel).step_by(channels) {
            self.frame[self.fill] = sample as f32 / PCM_NORM;
            self.fill += 1;
            if self.fill == len {
                on_frame(&self.frame);
                frames += 1;
                self.frame.copy_within(len - self.retained..len, 0);
                self.fill = self.retained;
            }
        }
        frames
    }

    /// Drop all buffered samples
    pub fn reset(&mut self) {
        self.frame.fill(0.0);
        self.fill = 0;
    }
}
