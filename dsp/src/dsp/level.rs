//! Sound level of the decoded PCM, in dB relative to full scale.

/// Time constant of the "fast" sound level meter response
pub const FAST_TIME_CONSTANT_MS: f32 = 125.0;
/// Reported for silence instead of negative infinity
pub const MIN_DBFS: f32 = -120.0;
const PCM_NORM: f32 = 32768.0;

/// Compute RMS in dBFS and the DC mean of `samples`, scaled to [-1, 1).
/// The mean is removed before the RMS, and the level is referenced so a
/// +/-1.0 sine reads 0 dBFS.
pub fn compute_rms_mean<I>(samples: I) -> (f32, f32)
where
    I: Iterator<Item = f32> + Clone,
{
    let (power, mean) = compute_power_mean(samples);
    (power_to_dbfs(power), mean)
}

/// Mean-removed power, as rms^2 * 2 so a full-scale sine has unit power
fn compute_power_mean<I>(samples: I) -> (f32, f32)
where
    I: Iterator<Item = f32> + Clone,
{
    let mut length = 0usize;
    let mut mean = 0.0f32;
    for sample in samples.clone() {
        mean += sample;
        length += 1;
    }
    if length == 0 {
        return (0.0, 0.0);
    }
    mean /= length as f32;

    let mut power = 0.0f32;
    for sample in samples {
        let x = sample - mean;
        power += x * x;
    }
    (2.0 * power / length as f32, mean)
}

fn power_to_dbfs(power: f32) -> f32 {
    if power <= 0.0 {
        return MIN_DBFS;
    }
    (10.0 * libm::log10f(power)).max(MIN_DBFS)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelReading {
    /// Level of the latest chunk alone
    pub rms_dbfs: f32,
    /// DC offset of the latest chunk, in full-scale units
    pub mean: f32,
    /// Exponentially averaged level
    pub smoothed_dbfs: f32,
}

impl Default for LevelReading {
    fn default() -> Self {
        Self { rms_dbfs: MIN_DBFS, mean: 0.0, smoothed_dbfs: MIN_DBFS }
    }
}

/// Per-chunk level meter with an exponential average of signal power
pub struct LevelMeter {
    alpha: f32,
    smoothed_power: Option<f32>,
    reading: LevelReading,
}

impl LevelMeter {
    /// Meter fed one chunk every `chunk_ms`, averaging with time constant
    /// `time_constant_ms`
    pub fn new(chunk_ms: f32, time_constant_ms: f32) -> Self {
        let alpha = if time_constant_ms > 0.0 {
            1.0 - libm::expf(-chunk_ms / time_constant_ms)
        } else {
            1.0
        };
        Self { alpha: alpha.clamp(0.0, 1.0), smoothed_power: None, reading: LevelReading::default() }
    }

    /// Meter one channel of interleaved PCM. Empty input leaves the reading
    /// unchanged.
    pub fn update_interleaved(&mut self, pcm: &[i16], channels: usize, channel: usize) -> LevelReading {
        if channels == 0 || channel >= channels || pcm.len() <= channel {
            return self.reading;
        }
        let samples = pcm.iter().skip(channel).step_by(channels).map(|&s| s as f32 / PCM_NORM);
        let (power, mean) = compute_power_mean(samples);
        let smoothed = match self.smoothed_power {
            Some(prev) => prev + self.alpha * (power - prev),
            None => power,
        };
        self.smoothed_power = Some(smoothed);
        self.reading = LevelReading {
            rms_dbfs: power_to_dbfs(power),
            mean,
            smoothed_dbfs: power_to_dbfs(smoothed),
        };
        self.reading
    }

    pub fn reading(&self) -> LevelReading {
        self.reading
    }

    pub fn reset(&mut self) {
        self.smoothed_power = None;
        self.reading = LevelReading::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::PI;

    fn sine(amplitude: f32, offset: f32, len: usize) -> Vec<i16> {
        // 16 samples per period, whole periods only
        (0..len)
            .map(|n| ((amplitude * libm::sinf(2.0 * PI * n as f32 / 16.0) + offset) * 32767.0) as i16)
            .collect()
    }

    #[test]
    fn sine_reads_its_amplitude_in_dbfs() {
        for amplitude in [0.9f32, 0.5, 0.1] {
            let mut meter = LevelMeter::new(1.0, FAST_TIME_CONSTANT_MS);
            let reading = meter.update_interleaved(&sine(amplitude, 0.0, 256), 1, 0);
            let expected = 20.0 * libm::log10f(amplitude);
            assert!((reading.rms_dbfs - expected).abs() < 0.1, "A={} read {}", amplitude, reading.rms_dbfs);
        }
    }

    #[test]
    fn dc_offset_is_removed() {
        let mut meter = LevelMeter::new(1.0, FAST_TIME_CONSTANT_MS);
        let reading = meter.update_interleaved(&sine(0.5, 0.25, 256), 1, 0);
        assert!((reading.rms_dbfs + 6.02).abs() < 0.1, "read {}", reading.rms_dbfs);
        assert!((reading.mean - 0.25).abs() < 1e-3);
    }

    #[test]
    fn free_function_matches_meter() {
        let samples: Vec<f32> = sine(0.5, 0.0, 64).iter().map(|&s| s as f32 / 32768.0).collect();
        let (db, mean) = compute_rms_mean(samples.iter().copied());
        assert!((db + 6.02).abs() < 0.1);
        assert!(mean.abs() < 1e-3);
        assert_eq!(compute_rms_mean(core::iter::empty::<f32>()), (MIN_DBFS, 0.0));
    }

    #[test]
    fn silence_reads_the_floor() {
        let mut meter = LevelMeter::new(1.0, FAST_TIME_CONSTANT_MS);
        let reading = meter.update_interleaved(&[0i16; 64], 1, 0);
        assert_eq!(reading.rms_dbfs, MIN_DBFS);
        assert_eq!(reading.smoothed_dbfs, MIN_DBFS);
    }

    #[test]
    fn smoothed_level_settles_on_a_steady_signal() {
        let mut meter = LevelMeter::new(1.0, FAST_TIME_CONSTANT_MS);
        let quiet = sine(0.01, 0.0, 32);
        let loud = sine(0.5, 0.0, 32);
        meter.update_interleaved(&quiet, 1, 0);
        let first = meter.update_interleaved(&loud, 1, 0);
        // One 1 ms chunk barely moves a 125 ms average
        assert!(first.smoothed_dbfs < first.rms_dbfs - 10.0);
        let mut reading = first;
        for _ in 0..2000 {
            reading = meter.update_interleaved(&loud, 1, 0);
        }
        assert!((reading.smoothed_dbfs - reading.rms_dbfs).abs() < 0.1);

        meter.reset();
        assert_eq!(meter.reading(), LevelReading::default());
    }

    #[test]
    fn meters_one_interleaved_channel() {
        let loud = sine(0.5, 0.0, 128);
        let interleaved: Vec<i16> = loud.iter().flat_map(|&s| [0, s]).collect();
        let mut meter = LevelMeter::new(1.0, FAST_TIME_CONSTANT_MS);
        assert_eq!(meter.update_interleaved(&interleaved, 2, 0).rms_dbfs, MIN_DBFS);
        let reading = meter.update_interleaved(&interleaved, 2, 1);
        assert!((reading.rms_dbfs + 6.02).abs() < 0.1);
        // Out of range channel leaves the reading alone
        assert_eq!(meter.update_interleaved(&interleaved, 2, 2), reading);
        assert_eq!(meter.update_interleaved(&interleaved, 0, 0), reading);
    }
}
