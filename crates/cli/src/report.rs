//! Per-image result reporting

use harvest_common::PixelBox;
use harvest_detector::class_name;
use harvest_fusion::FusionResult;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of processing one tray image
#[derive(Debug, Serialize)]
pub struct ImageReport {
    /// Input path as given on the command line
    pub file: String,
    /// Whether the image made it through the pipeline
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FusionResult>,
    /// Annotated copy, when one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated: Option<PathBuf>,
    pub elapsed_ms: u128,
}

impl ImageReport {
    pub fn done(
        path: &Path,
        result: FusionResult,
        annotated: Option<PathBuf>,
        elapsed: Duration,
    ) -> Self {
        Self {
            file: path.display().to_string(),
            ok: true,
            error: None,
            result: Some(result),
            annotated,
            elapsed_ms: elapsed.as_millis(),
        }
    }

    pub fn failed(path: &Path, error: String, elapsed: Duration) -> Self {
        Self {
            file: path.display().to_string(),
            ok: false,
            error: Some(error),
            result: None,
            annotated: None,
            elapsed_ms: elapsed.as_millis(),
        }
    }

    /// Final pick-ready boxes, empty for failed images
    #[must_use]
    pub fn boxes(&self) -> &[PixelBox] {
        self.result.as_ref().map_or(&[], |r| r.boxes.as_slice())
    }
}

/// Print one report as a human-readable block
pub fn print_text(report: &ImageReport, index: usize, total: usize) {
    match &report.result {
        Some(result) => {
            println!(
                "✓ [{}/{}] {} - {} caps in {:.2}s (complexity {:.1})",
                index + 1,
                total,
                report.file,
                result.detections.len(),
                report.elapsed_ms as f64 / 1000.0,
                result.complexity
            );
            for detection in &result.detections {
                println!(
                    "    [{} {:.2}] x={} y={} w={} h={} via {}",
                    class_name(detection.class_id),
                    detection.confidence,
                    detection.x,
                    detection.y,
                    detection.w,
                    detection.h,
                    detection.source_scale
                );
            }
            println!("    {} boxes ready for picking", result.boxes.len());
        }
        None => {
            println!(
                "✗ [{}/{}] {} - FAILED: {}",
                index + 1,
                total,
                report.file,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
