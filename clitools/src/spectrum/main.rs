/** Replay a raw PDM capture through the spectrum pipeline.

Reads interleaved 1-bit microphone data from a file, feeds it chunk by chunk
through a double buffer as the capture engine would, writes the decoded PCM to
a WAV file and reports the strongest bin of the averaged spectrum.

    spectrum <capture.pdm> [out.wav] [--rate HZ] [--channels N] [--fft N]
             [--overlap F] [--window NAME]
*/
use std::error::Error;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::time::Instant;

use env_logger::Env;
use log::{error, info, warn};
use pdm_dsp::buffer::{CaptureHandler, HalfReady, PdmDoubleBuffer};
use pdm_dsp::config::ByteOrder;
use pdm_dsp::pipeline::{PipelineConfig, SpectrumPipeline};
use pdm_dsp::window::WindowKind;

const DEFAULT_WAV: &str = "out.wav";

struct Args {
    input: String,
    output: String,
    config: PipelineConfig,
}

fn bad_value(arg: &str, value: &str) -> String {
    format!("bad value for {}: {}", arg, value)
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut config = PipelineConfig::default();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if !arg.starts_with("--") {
            positional.push(arg.clone());
            continue;
        }
        let value = iter.next().ok_or(format!("{} needs a value", arg))?;
        match arg.as_str() {
            "--rate" => config.capture.sample_rate = value.parse().map_err(|_| bad_value(arg, value))?,
            "--channels" => {
                let channels: usize = value.parse().map_err(|_| bad_value(arg, value))?;
                config.capture.channels = channels;
                config.capture.byte_order = ByteOrder::for_channels(channels);
            }
            "--fft" => config.fft.transform_length = value.parse().map_err(|_| bad_value(arg, value))?,
            "--overlap" => config.overlap = value.parse().map_err(|_| bad_value(arg, value))?,
            "--window" => {
                config.fft.window =
                    WindowKind::from_name(value).ok_or(format!("unknown window {}", value))?
            }
            _ => return Err(format!("unknown option {}", arg)),
        }
    }

    let mut positional = positional.into_iter();
    let input = positional.next().ok_or("missing input file")?;
    let output = positional.next().unwrap_or_else(|| DEFAULT_WAV.to_string());
    Ok(Args { input, output, config })
}

/// Forwards chunks to the pipeline and keeps the decoded PCM, timing each
/// chunk against its deadline
struct Recorder<W: std::io::Write + std::io::Seek> {
    pipeline: SpectrumPipeline,
    writer: hound::WavWriter<W>,
    late_chunks: u32,
    write_error: Option<hound::Error>,
}

impl<W: std::io::Write + std::io::Seek> Recorder<W> {
    fn handle(&mut self, chunk: HalfReady<'_>) {
        let start = Instant::now();
        self.pipeline.push_pdm_chunk(chunk.data());
        if start.elapsed() > chunk.deadline() {
            self.late_chunks += 1;
        }
        if self.write_error.is_some() {
            return;
        }
        for &sample in self.pipeline.last_pcm() {
            if let Err(e) = self.writer.write_sample(sample) {
                self.write_error = Some(e);
                break;
            }
        }
    }
}

impl<W: std::io::Write + std::io::Seek> CaptureHandler for Recorder<W> {
    fn on_half_ready(&mut self, chunk: HalfReady<'_>) {
        self.handle(chunk);
    }

    fn on_full_ready(&mut self, chunk: HalfReady<'_>) {
        self.handle(chunk);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let capture = args.config.capture.clone();
    let mut buffer = PdmDoubleBuffer::from_capture(&capture)?;
    let pipeline = SpectrumPipeline::new(args.config)?;
    let meta = pipeline.metadata();

    let wav_spec = hound::WavSpec {
        channels: capture.channels as u16,
        sample_rate: meta.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let writer = hound::WavWriter::create(&args.output, wav_spec)?;
    let mut recorder = Recorder { pipeline, writer, late_chunks: 0, write_error: None };

    let mut file = File::open(&args.input)?;
    let mut chunks = 0u64;
    loop {
        match file.read_exact(buffer.producer_region()) {
            Ok(()) => {}
            // A trailing partial chunk is dropped
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        buffer.signal(&mut recorder);
        chunks += 1;
    }

    let Recorder { pipeline, writer, late_chunks, write_error } = recorder;
    if let Some(e) = write_error {
        return Err(e.into());
    }
    writer.finalize()?;

    info!(
        "{} chunks ({} ms), {} transforms, PCM written to {}",
        chunks,
        chunks * capture.ms_per_chunk as u64,
        pipeline.transforms(),
        args.output
    );
    if late_chunks > 0 {
        warn!("{} chunks took longer than their real-time budget", late_chunks);
    }

    let level = pipeline.level();
    info!(
        "Level {:.1} dBFS (last chunk {:.1} dBFS, DC {:.4})",
        level.smoothed_dbfs, level.rms_dbfs, level.mean
    );

    let spectrum = pipeline.reader().snapshot();
    let peak = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .fold((0, 0.0f32), |best, (k, &m)| if m > best.1 { (k, m) } else { best });
    if pipeline.transforms() == 0 || peak.1 == 0.0 {
        warn!("No spectrum: input shorter than one transform, or silent");
    } else {
        // A full-scale sine reads T / 2 before windowing
        let full_scale = meta.transform_length as f32 / 2.0;
        info!(
            "Peak at bin {} ({:.1} Hz), {:.1} dBFS",
            peak.0,
            meta.bin_frequency(peak.0),
            20.0 * (peak.1 / full_scale).log10()
        );
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(msg) => {
            error!("{}", msg);
            eprintln!(
                "usage: {} <capture.pdm> [out.wav] [--rate HZ] [--channels N] [--fft N] [--overlap F] [--window NAME]",
                args.first().map(String::as_str).unwrap_or("spectrum")
            );
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}
