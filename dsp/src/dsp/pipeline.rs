use log::{info, trace};

use crate::average::{AveragingMode, SpectralAverager, SpectrumReader};
use crate::buffer::{CaptureHandler, HalfReady};
use crate::config::CaptureConfig;
use crate::error::{ConfigError, Result};
use crate::fft::{FftConfig, SpectrumAnalyzer};
use crate::level::{LevelMeter, LevelReading, FAST_TIME_CONSTANT_MS};
use crate::overlap::OverlapSaveAssembler;
use crate::pdm_processing::DecimationFilter;

/// Everything needed to build a [`SpectrumPipeline`]. Fixed for the life of
/// the pipeline; only the volume can change afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub fft: FftConfig,
    /// Fraction of each frame carried into the next, in [0, 1)
    pub overlap: f32,
    pub averaging: AveragingMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            fft: FftConfig::default(),
            overlap: 0.5,
            averaging: AveragingMode::RunningMean,
        }
    }
}

/// Describes the published spectrum
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectrumMetadata {
    pub sample_rate: u32,
    pub transform_length: usize,
}

impl SpectrumMetadata {
    pub fn bins(&self) -> usize {
        self.transform_length / 2 + 1
    }

    /// Centre frequency of bin `k` in Hz
    pub fn bin_frequency(&self, k: usize) -> f32 {
        k as f32 * self.sample_rate as f32 / self.transform_length as f32
    }
}

/// Owns the whole chain from raw PDM chunks to the averaged spectrum. Feed it
/// chunks directly with [`SpectrumPipeline::push_pdm_chunk`] or hand it to a
/// [`crate::buffer::PdmDoubleBuffer`] as the capture handler.
pub struct SpectrumPipeline {
    filter: DecimationFilter,
    assembler: OverlapSaveAssembler,
    analyzer: SpectrumAnalyzer,
    averager: SpectralAverager,
    level: LevelMeter,
    pcm: Vec<i16>,
    pcm_len: usize,
    chunk_bytes: usize,
    analysis_channel: usize,
    metadata: SpectrumMetadata,
    transforms: u64,
}

impl SpectrumPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let rate = config.capture.validate()?;
        let filter = DecimationFilter::from_capture(&config.capture)?;
        let assembler = OverlapSaveAssembler::new(config.fft.transform_length, config.overlap)?;
        let analyzer = SpectrumAnalyzer::new(&config.fft)?;
        let averager = SpectralAverager::new(config.fft.bins(), config.averaging)?;

        let chunk_bytes = config.capture.bytes_per_chunk()?;
        let pcm_samples = filter.output_frames(chunk_bytes) * filter.channels_out();
        let mut pcm = Vec::new();
        pcm.try_reserve_exact(pcm_samples)
            .map_err(|_| ConfigError::resource_exhausted("PCM scratch buffer"))?;
        pcm.resize(pcm_samples, 0);

        let metadata = SpectrumMetadata {
            sample_rate: rate.hz(),
            transform_length: config.fft.transform_length,
        };
        info!(
            "Spectrum pipeline: {} Hz, {} byte chunks -> {} PCM samples, {} bins of {:.2} Hz, {:?}",
            metadata.sample_rate,
            chunk_bytes,
            pcm_samples,
            metadata.bins(),
            metadata.bin_frequency(1),
            config.averaging,
        );

        Ok(Self {
            filter,
            assembler,
            analyzer,
            averager,
            level: LevelMeter::new(config.capture.ms_per_chunk as f32, FAST_TIME_CONSTANT_MS),
            pcm,
            pcm_len: 0,
            chunk_bytes,
            analysis_channel: config.capture.analysis_channel,
            metadata,
            transforms: 0,
        })
    }

    pub fn metadata(&self) -> SpectrumMetadata {
        self.metadata
    }

    /// Handle for reading the averaged spectrum, from any thread
    pub fn reader(&self) -> SpectrumReader {
        self.averager.reader()
    }

    pub fn averager(&self) -> &SpectralAverager {
        &self.averager
    }

    /// Latest windowed transform, in the configured output form
    pub fn analyzer(&self) -> &SpectrumAnalyzer {
        &self.analyzer
    }

    /// Bytes of PDM expected per chunk
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Sound level of the analysed channel, updated every chunk
    pub fn level(&self) -> LevelReading {
        self.level.reading()
    }

    /// Interleaved PCM decoded from the most recent chunk
    pub fn last_pcm(&self) -> &[i16] {
        &self.pcm[..self.pcm_len]
    }

    /// Transforms run since construction
    pub fn transforms(&self) -> u64 {
        self.transforms
    }

    /// Applies from the next chunk
    pub fn set_volume(&mut self, level: u32) -> Result<()> {
        self.filter.set_volume(level)
    }

    pub fn reset_average(&mut self) {
        self.averager.reset();
    }

    /// Run raw PDM through the whole chain. Returns the number of transforms
    /// it triggered. Input longer than [`SpectrumPipeline::chunk_bytes`] is
    /// processed one chunk at a time, and [`SpectrumPipeline::last_pcm`] then
    /// holds the PCM of the final chunk.
    pub fn push_pdm_chunk(&mut self, raw: &[u8]) -> usize {
        let mut transforms = 0;
        for chunk in raw.chunks(self.chunk_bytes) {
            transforms += self.process_chunk(chunk);
        }
        transforms
    }

    fn process_chunk(&mut self, raw: &[u8]) -> usize {
        let frames = self.filter.process(raw, &mut self.pcm);
        let channels = self.filter.channels_out();
        self.pcm_len = frames * channels;
        self.level
            .update_interleaved(&self.pcm[..self.pcm_len], channels, self.analysis_channel);

        let analyzer = &mut self.analyzer;
        let averager = &mut self.averager;
        let transforms = self.assembler.feed_interleaved(
            &self.pcm[..self.pcm_len],
            channels,
            self.analysis_channel,
            |frame| {
                analyzer.analyze(frame);
                averager.update(analyzer.magnitudes());
            },
        );
        self.transforms += transforms as u64;
        trace!("Chunk: {} frames, {} transforms", frames, transforms);
        transforms
    }
}

impl CaptureHandler for SpectrumPipeline {
    fn on_half_ready(&mut self, chunk: HalfReady<'_>) {
        self.push_pdm_chunk(chunk.data());
    }

    fn on_full_ready(&mut self, chunk: HalfReady<'_>) {
        self.push_pdm_chunk(chunk.data());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::average::AverageState;
    use crate::buffer::PdmDoubleBuffer;
    use crate::window::WindowKind;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            fft: FftConfig { transform_length: 64, ..Default::default() },
            overlap: 0.5,
            ..Default::default()
        }
    }

    #[test]
    fn metadata_describes_bins() {
        let pipeline = SpectrumPipeline::new(PipelineConfig::default()).unwrap();
        let meta = pipeline.metadata();
        assert_eq!(meta.sample_rate, 16_000);
        assert_eq!(meta.bins(), 513);
        assert_eq!(meta.bin_frequency(64), 1000.0);
        assert_eq!(pipeline.reader().len(), 513);
        assert_eq!(pipeline.chunk_bytes(), 160);
    }

    #[test]
    fn transforms_follow_overlap_schedule() {
        let mut pipeline = SpectrumPipeline::new(small_config()).unwrap();
        // 16 samples per 1 ms chunk: first frame after 64, then every 32
        let chunk = vec![0x55u8; 160];
        let mut total = 0;
        for _ in 0..4 {
            total += pipeline.push_pdm_chunk(&chunk);
        }
        assert_eq!(total, 1);
        for _ in 0..8 {
            total += pipeline.push_pdm_chunk(&chunk);
        }
        assert_eq!(total, 5);
        assert_eq!(pipeline.transforms(), 5);
        assert_eq!(pipeline.averager().count(), 5);
        assert_eq!(pipeline.last_pcm().len(), 16);
    }

    #[test]
    fn runs_as_capture_handler() {
        let config = small_config();
        let mut buffer = PdmDoubleBuffer::from_capture(&config.capture).unwrap();
        let mut pipeline = SpectrumPipeline::new(config).unwrap();
        for _ in 0..12 {
            buffer.producer_region().fill(0x0f);
            buffer.signal(&mut pipeline);
        }
        assert_eq!(pipeline.transforms(), 5);
        assert_eq!(pipeline.averager().state(), AverageState::Warm);
        assert_eq!(pipeline.reader().publications(), 5);
    }

    #[test]
    fn analyses_the_selected_channel() {
        let capture = CaptureConfig { analysis_channel: 1, ..CaptureConfig::with_channels(2) };
        let config = PipelineConfig {
            capture,
            fft: FftConfig { transform_length: 64, window: WindowKind::Rectangular, ..Default::default() },
            overlap: 0.0,
            ..Default::default()
        };
        let mut pipeline = SpectrumPipeline::new(config).unwrap();
        // Channel 0 loud square-ish pattern, channel 1 silent (alternating bits)
        let chunk: Vec<u8> = (0..320).map(|i| if i % 2 == 0 { if (i / 40) % 2 == 0 { 0xff } else { 0x00 } } else { 0xaa }).collect();
        for _ in 0..40 {
            pipeline.push_pdm_chunk(&chunk);
        }
        let spectrum = pipeline.reader().snapshot();
        assert!(spectrum.iter().all(|&m| m < 0.064), "{:?}", spectrum);
    }

    #[test]
    fn oversized_input_is_split_into_chunks() {
        let chunk = vec![0x55u8; 160];
        let mut single = SpectrumPipeline::new(small_config()).unwrap();
        let mut expected = 0;
        for _ in 0..16 {
            expected += single.push_pdm_chunk(&chunk);
        }

        let mut doubled = SpectrumPipeline::new(small_config()).unwrap();
        let double = vec![0x55u8; 320];
        let mut total = 0;
        for _ in 0..8 {
            total += doubled.push_pdm_chunk(&double);
        }
        // 256 samples: one frame at 64, then one per 32
        assert_eq!(expected, 7);
        assert_eq!(total, expected);
        assert_eq!(doubled.last_pcm().len(), 16);
        assert_eq!(doubled.last_pcm(), single.last_pcm());

        // A trailing partial chunk still decodes
        assert_eq!(doubled.push_pdm_chunk(&vec![0x55u8; 240]), single.push_pdm_chunk(&chunk) + single.push_pdm_chunk(&chunk[..80]));
        assert_eq!(doubled.last_pcm().len(), 8);
    }

    #[test]
    fn level_follows_the_analysed_channel() {
        let mut pipeline = SpectrumPipeline::new(small_config()).unwrap();
        assert_eq!(pipeline.level(), LevelReading::default());
        // Idle pattern decodes to silence
        for _ in 0..50 {
            pipeline.push_pdm_chunk(&[0xaa; 160]);
        }
        assert!(pipeline.level().rms_dbfs < -60.0, "{:?}", pipeline.level());
    }

    #[test]
    fn volume_changes_are_validated() {
        let mut pipeline = SpectrumPipeline::new(small_config()).unwrap();
        assert!(pipeline.set_volume(10).is_ok());
        assert_eq!(pipeline.set_volume(1000), Err(ConfigError::VolumeOutOfRange(1000)));
        pipeline.reset_average();
        assert_eq!(pipeline.averager().state(), AverageState::Empty);
    }

    #[test]
    fn bad_configuration_is_rejected() {
        let config = PipelineConfig { overlap: 1.0, ..Default::default() };
        assert_eq!(SpectrumPipeline::new(config).err(), Some(ConfigError::InvalidOverlap(1.0)));

        let config = PipelineConfig {
            capture: CaptureConfig { sample_rate: 11_025, ..Default::default() },
            ..Default::default()
        };
        assert_eq!(SpectrumPipeline::new(config).err(), Some(ConfigError::UnsupportedSampleRate(11_025)));
    }
}
