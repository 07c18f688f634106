//! Harvest Vision CLI - tray processing for the picking cell
//!
//! Command-line driver around the fusion pipeline: enhance each tray
//! image, detect at multiple scales, fuse the results, and optionally
//! hand the surviving boxes to the simulated arm.

use anyhow::{Context as _, Result};
use clap::Parser;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod report;

use config::AppConfig;
use harvest_arm_sim::{ArmSimulator, PickReport};
use harvest_common::image_io::load_image;
use harvest_detector::OnnxDetector;
use harvest_enhancer::enhance;
use harvest_fusion::FusionPipeline;
use harvest_visualizer::save_annotated;
use report::{print_text, ImageReport};

#[derive(Parser)]
#[command(
    name = "harvest-vision",
    version,
    about = "Multi-scale mushroom detection for tray picking",
    long_about = "Detect straw mushroom caps in tray images ahead of the picking arm.\n\
                  Each image is enhanced, run through the detector at several scales,\n\
                  and the per-scale results are fused into one deduplicated box list.",
    after_help = "EXAMPLES:\n  \
                  # Detect caps in a batch of tray images\n  \
                  harvest-vision --model yolov5s.onnx tray_*.jpg\n\n  \
                  # Save annotated copies and emit JSON lines\n  \
                  harvest-vision --model yolov5s.onnx --viz-dir ./viz --json tray_01.jpg\n\n  \
                  # Run the simulated arm over the fused boxes\n  \
                  harvest-vision --model yolov5s.onnx --pick tray_01.jpg tray_02.jpg"
)]
struct Cli {
    /// Input tray images
    #[arg(value_name = "IMAGES", required = true)]
    images: Vec<PathBuf>,

    /// Path to the ONNX detection model
    #[arg(short, long)]
    model: PathBuf,

    /// YAML configuration file (stage defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for annotated copies of each image
    #[arg(long)]
    viz_dir: Option<PathBuf>,

    /// Run the simulated arm over the fused boxes
    #[arg(long)]
    pick: bool,

    /// Emit JSON lines instead of human-readable output
    #[arg(long)]
    json: bool,

    /// Number of worker threads (defaults to all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    if let Some(threads) = cli.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok(); // Ignore error if already initialized
    }

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let app_config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    let detector = OnnxDetector::new(&cli.model, app_config.detector.clone())
        .with_context(|| format!("Failed to load model from {}", cli.model.display()))?;
    let pipeline =
        FusionPipeline::new(app_config.fusion.clone()).context("Invalid fusion configuration")?;

    info!("=== Harvest Vision ===");
    info!("Input images: {}", cli.images.len());

    let start = Instant::now();
    let reports: Vec<ImageReport> = cli
        .images
        .par_iter()
        .map(|path| {
            process_image(
                path,
                &app_config,
                &detector,
                &pipeline,
                cli.viz_dir.as_deref(),
            )
        })
        .collect();

    let total = reports.len();
    for (index, report) in reports.iter().enumerate() {
        if cli.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            print_text(report, index, total);
        }
    }

    if cli.pick {
        run_arm(&reports, &app_config, cli.json)?;
    }

    let succeeded = reports.iter().filter(|r| r.ok).count();
    let failed = total - succeeded;
    let total_boxes: usize = reports.iter().map(|r| r.boxes().len()).sum();
    let total_time = start.elapsed();

    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "type": "summary",
                "total_images": total,
                "succeeded": succeeded,
                "failed": failed,
                "total_boxes": total_boxes,
                "total_time_s": total_time.as_secs_f64(),
            })
        );
    } else {
        info!("=== Processing Complete ===");
        info!("Total images: {}", total);
        info!("Succeeded: {}", succeeded);
        info!("Failed: {}", failed);
        info!("Total boxes: {}", total_boxes);
        info!("Total time: {:.2}s", total_time.as_secs_f64());
    }

    if succeeded == 0 {
        anyhow::bail!("No images were processed successfully");
    }
    Ok(())
}

/// Run one image through enhance, fusion, and optional annotation
fn process_image(
    path: &Path,
    config: &AppConfig,
    detector: &OnnxDetector,
    pipeline: &FusionPipeline,
    viz_dir: Option<&Path>,
) -> ImageReport {
    let start = Instant::now();

    let image = match load_image(path) {
        Ok(image) => image,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            return ImageReport::failed(path, e.to_string(), start.elapsed());
        }
    };

    let enhanced = enhance(&image, &config.enhancer);

    let result = match pipeline.run(&enhanced, detector) {
        Ok(result) => result,
        Err(e) => {
            warn!("Fusion failed for {}: {}", path.display(), e);
            return ImageReport::failed(path, e.to_string(), start.elapsed());
        }
    };

    // Boxes are in the enhanced frame, so annotate the enhanced copy
    let annotated = viz_dir.and_then(|dir| {
        match save_annotated(&enhanced, &result.detections, path, dir) {
            Ok(out_path) => Some(out_path),
            Err(e) => {
                warn!("Could not annotate {}: {}", path.display(), e);
                None
            }
        }
    });

    ImageReport::done(path, result, annotated, start.elapsed())
}

/// Feed every image's boxes to one simulated arm, tray by tray
fn run_arm(reports: &[ImageReport], config: &AppConfig, json: bool) -> Result<()> {
    let mut arm = ArmSimulator::new(config.arm.clone());
    let mut combined = PickReport::default();

    for report in reports {
        let boxes = report.boxes();
        if boxes.is_empty() {
            continue;
        }

        let pick = arm.pick_all(boxes);
        combined.attempted += pick.attempted;
        combined.picked += pick.picked;
        combined.skipped += pick.skipped;
        combined.travel_mm += pick.travel_mm;
        combined.duration_s += pick.duration_s;

        if json {
            println!(
                "{}",
                serde_json::json!({
                    "type": "pick",
                    "file": report.file,
                    "report": pick,
                })
            );
        } else {
            println!(
                "  arm: {}/{} picked from {} ({:.0} mm, {:.1}s simulated)",
                pick.picked, pick.attempted, report.file, pick.travel_mm, pick.duration_s
            );
        }
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "type": "pick_summary",
                "report": combined,
            })
        );
    } else {
        info!(
            "Arm total: {}/{} picked, {} skipped, {:.0} mm in {:.1}s simulated",
            combined.picked,
            combined.attempted,
            combined.skipped,
            combined.travel_mm,
            combined.duration_s
        );
    }
    Ok(())
}
