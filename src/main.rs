mod capture;
mod output;

use anyhow::{Context, Result};
use capture::{DirectorySource, FrameSource};
use clap::Parser;
use depthmatte::{load_config, FrameReport, Segmenter, SegmenterConfig, StageTimings};
use output::{LabelSink, PngSink};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of recorded depth_NNNN.png / color_NNNN.png pairs
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Directory label_NNNN.png files are written to
    #[arg(short, long, default_value = "labels")]
    output_dir: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw depth above which the sensor is considered unreliable
    #[arg(long)]
    max_depth: Option<u16>,

    /// Skip noise calibration and use this depth standard deviation
    #[arg(long)]
    std_dev: Option<f32>,

    /// Gaussian components per color model
    #[arg(long)]
    clusters: Option<usize>,

    /// Smallest foreground component kept as a seed, in pixels
    #[arg(long)]
    min_area: Option<u32>,

    /// Width of the band the color stage decides, in pixels
    #[arg(long)]
    dilation: Option<u32>,

    /// Segment every seed instead of only the largest
    #[arg(long)]
    all_seeds: bool,

    /// Also write the color frame masked by the labels
    #[arg(long)]
    show_matte: bool,

    /// Replay rate limit (0 = as fast as possible)
    #[arg(long, default_value_t = 0)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn segmenter_config(&self) -> Result<SegmenterConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => SegmenterConfig::default(),
        };

        if let Some(max_depth) = self.max_depth {
            config.depth.max_depth = max_depth;
        }
        if let Some(std_dev) = self.std_dev {
            config.depth.constant_std_dev = Some(std_dev);
        }
        if let Some(clusters) = self.clusters {
            config.gmm.set_cluster_count(clusters);
        }
        if let Some(min_area) = self.min_area {
            config.seed.min_area = min_area;
        }
        if let Some(dilation) = self.dilation {
            config.seed.dilation = dilation;
        }
        if self.all_seeds {
            config.seed.largest_only = false;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("depthmatte starting");

    let config = args.segmenter_config()?;
    tracing::info!(
        "Calibration: {} noise frames, {} background frames",
        if config.depth.constant_std_dev.is_some() {
            0
        } else {
            config.calibration.noise_frames
        },
        config.calibration.background_frames
    );

    let mut source = DirectorySource::new(&args.input_dir).context("Failed to open frame source")?;
    let (width, height) = source.resolution();
    tracing::info!("Input: {} frames at {}x{}", source.len(), width, height);

    let mut sink = PngSink::new(&args.output_dir, args.show_matte).context("Failed to initialize label output")?;

    let mut segmenter = Segmenter::new(config).context("Failed to initialize segmenter")?;

    run_pipeline(&mut source, &mut sink, &mut segmenter, args.fps)?;

    Ok(())
}

#[derive(Default)]
struct Totals {
    frames: u64,
    capture: Duration,
    stages: StageTimings,
    output: Duration,
}

impl Totals {
    fn add(&mut self, report: &FrameReport) {
        let t = &report.timings;
        self.stages.classify += t.classify;
        self.stages.seeds += t.seeds;
        self.stages.gmm += t.gmm;
        self.stages.costs += t.costs;
        self.stages.graphcut += t.graphcut;
    }

    fn avg_ms(&self, d: Duration) -> f64 {
        d.as_secs_f64() * 1000.0 / self.frames.max(1) as f64
    }

    fn log(&self, report: &FrameReport) {
        let capture = self.avg_ms(self.capture);
        let segment = self.avg_ms(self.stages.total());
        let output = self.avg_ms(self.output);
        let total_ms = capture + segment + output;

        tracing::info!(
            "Frame {}: capture={:.1}ms, classify={:.1}ms, seeds={:.1}ms, gmm={:.1}ms, costs={:.1}ms, graphcut={:.1}ms, output={:.1}ms, fps={:.1}",
            self.frames,
            capture,
            self.avg_ms(self.stages.classify),
            self.avg_ms(self.stages.seeds),
            self.avg_ms(self.stages.gmm),
            self.avg_ms(self.stages.costs),
            self.avg_ms(self.stages.graphcut),
            output,
            if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 }
        );
        if report.segmented_area > 0 {
            tracing::info!(
                "Subject: {} px, ratio={:.2}, distance={}",
                report.foreground_pixels,
                report.ratio,
                report
                    .subject_distance
                    .map_or_else(|| "unknown".to_string(), |d| format!("{d:.2}m"))
            );
        }
    }
}

fn run_pipeline<S, O>(source: &mut S, sink: &mut O, segmenter: &mut Segmenter, target_fps: u32) -> Result<()>
where
    S: FrameSource,
    O: LabelSink,
{
    let frame_duration = (target_fps > 0).then(|| Duration::from_secs_f32(1.0 / target_fps as f32));
    let mut totals = Totals::default();
    let mut seen_version = segmenter.label_version();
    let mut skipped = 0u64;
    let mut phase = segmenter.phase();

    tracing::info!("Starting main pipeline loop");

    loop {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let Some((depth, color)) = source.next_frame().context("Failed to read frame")? else {
            break;
        };
        totals.capture += capture_start.elapsed();

        // A failed stage only skips this frame
        let report = match segmenter.push_frame(&depth, &color) {
            Ok(report) => report,
            Err(e) => {
                skipped += 1;
                tracing::warn!("Frame skipped: {}", e);
                continue;
            }
        };
        totals.frames += 1;
        totals.add(&report);

        if segmenter.phase() != phase {
            phase = segmenter.phase();
            tracing::info!("Entering {:?} after frame {}", phase, report.frame);
        }

        let output_start = Instant::now();
        if let Some((version, labels)) = segmenter.labels_since(seen_version) {
            sink.write_labels(report.frame, labels, &color)
                .context("Failed to write labels")?;
            seen_version = version;
        }
        totals.output += output_start.elapsed();

        // Log stats every 30 frames
        if totals.frames % 30 == 0 {
            totals.log(&report);
        }

        if let Some(frame_duration) = frame_duration {
            let elapsed = loop_start.elapsed();
            if elapsed < frame_duration {
                std::thread::sleep(frame_duration - elapsed);
            }
        }
    }

    tracing::info!("Replay finished: {} frames processed, {} skipped", totals.frames, skipped);
    Ok(())
}
