//! End-to-end pipeline integration
//!
//! Drives the whole library path a tray image takes: enhancement,
//! multi-scale detection, fusion, annotation, and the simulated arm.
//! The detector is scripted per scale, so no model files are needed and
//! every run is deterministic.
//!
//! Run: cargo test --test pipeline_integration

use harvest_arm_sim::{ArmConfig, ArmSimulator, WorkspaceLimits};
use harvest_common::{Detector, RawDetection, Result, Scale};
use harvest_enhancer::{enhance, EnhancerConfig};
use harvest_fusion::{FusionConfig, FusionPipeline};
use harvest_visualizer::{annotate, scale_color};
use image::{Rgb, RgbImage};
use std::collections::HashMap;

/// Returns canned detections keyed by the width of the resized input,
/// standing in for the model across pyramid scales
struct ScriptedDetector {
    per_width: HashMap<u32, Vec<RawDetection>>,
}

impl ScriptedDetector {
    fn new(entries: Vec<(u32, Vec<RawDetection>)>) -> Self {
        Self {
            per_width: entries.into_iter().collect(),
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        Ok(self
            .per_width
            .get(&image.width())
            .cloned()
            .unwrap_or_default())
    }
}

fn raw(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> RawDetection {
    RawDetection {
        x,
        y,
        w,
        h,
        confidence,
        class_id: 32,
    }
}

/// Flat gray tray: zero edge complexity, so the base scale set runs
fn flat_tray(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
}

/// Busy checkerboard tray: edge complexity well past the dense cutoff
fn busy_tray(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([230, 230, 230])
        } else {
            Rgb([30, 30, 30])
        }
    })
}

#[test]
fn full_pipeline_fuses_scales_and_feeds_the_arm() {
    let tray = flat_tray(1000, 1000);
    let enhanced = enhance(&tray, &EnhancerConfig::default());
    assert_eq!(enhanced.dimensions(), (1000, 1000));

    // The same cap reported at two scales, plus a second cap at the
    // coarsest scale only
    let detector = ScriptedDetector::new(vec![
        (640, vec![raw(64, 64, 32, 32, 0.9)]),
        (960, vec![raw(96, 96, 48, 48, 0.85)]),
        (1280, vec![raw(640, 640, 64, 64, 0.7)]),
    ]);

    let pipeline = FusionPipeline::new(FusionConfig::default()).unwrap();
    let result = pipeline.run(&enhanced, &detector).unwrap();

    // Flat tray keeps the base scale set
    assert_eq!(result.complexity, 0.0);
    assert_eq!(
        result.scales,
        vec![
            Scale::new(640, 640),
            Scale::new(960, 960),
            Scale::new(1280, 1280)
        ]
    );

    // The duplicate collapses to the higher-confidence copy
    assert_eq!(result.detections.len(), 2);
    let first = &result.detections[0];
    assert_eq!((first.x, first.y, first.w, first.h), (100, 100, 50, 50));
    assert!((first.confidence - 0.9).abs() < 1e-6);
    assert_eq!(first.source_scale, Scale::new(640, 640));
    let second = &result.detections[1];
    assert_eq!((second.x, second.y, second.w, second.h), (500, 500, 50, 50));

    // Nothing touches an axis, so both boxes survive the zero filter
    assert_eq!(result.boxes.len(), 2);

    // Annotation draws in the color of the surviving scale
    let annotated = annotate(&enhanced, &result.detections);
    assert_eq!(annotated.dimensions(), (1000, 1000));
    assert_eq!(
        *annotated.get_pixel(100, 100),
        scale_color(Scale::new(640, 640))
    );

    // Both caps are reachable, so the arm picks everything
    let mut arm = ArmSimulator::new(ArmConfig::default());
    let report = arm.pick_all(&result.boxes);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.picked, 2);
    assert_eq!(report.skipped, 0);
    assert!(report.travel_mm > 0.0);
}

#[test]
fn busy_tray_switches_to_the_dense_scale_set() {
    let tray = busy_tray(1000, 1000);

    // Only the finest scale is scripted; it fires only when the dense
    // set is selected
    let detector = ScriptedDetector::new(vec![(320, vec![raw(32, 32, 16, 16, 0.9)])]);

    // Checkerboard edges land well above a lowered cutoff
    let config = FusionConfig {
        complexity_threshold: 10.0,
        ..Default::default()
    };
    let pipeline = FusionPipeline::new(config.clone()).unwrap();
    let result = pipeline.run(&tray, &detector).unwrap();

    assert!(result.complexity > config.complexity_threshold);
    assert_eq!(
        result.scales,
        vec![
            Scale::new(320, 320),
            Scale::new(640, 640),
            Scale::new(960, 960)
        ]
    );

    assert_eq!(result.detections.len(), 1);
    let cap = &result.detections[0];
    assert_eq!((cap.x, cap.y, cap.w, cap.h), (100, 100, 50, 50));
    assert_eq!(cap.source_scale, Scale::new(320, 320));
}

#[test]
fn small_tray_is_upscaled_before_detection() {
    let tray = flat_tray(320, 240);
    let enhanced = enhance(&tray, &EnhancerConfig::default());
    // Below the upscale cutoff, so the pipeline sees a doubled frame
    assert_eq!(enhanced.dimensions(), (640, 480));

    let detector = ScriptedDetector::new(vec![(640, vec![raw(64, 48, 32, 24, 0.9)])]);
    let pipeline = FusionPipeline::new(FusionConfig::default()).unwrap();
    let result = pipeline.run(&enhanced, &detector).unwrap();

    assert_eq!((result.frame.width, result.frame.height), (640, 480));
    assert_eq!(result.detections.len(), 1);
    let cap = &result.detections[0];
    // Detector coords map through the 640x640 scale into the 640x480
    // frame, truncating
    assert_eq!((cap.x, cap.y, cap.w, cap.h), (64, 36, 32, 18));
    assert_eq!(result.boxes.len(), 1);
}

#[test]
fn unreachable_boxes_are_skipped_not_fatal() {
    let tray = flat_tray(1000, 1000);
    let detector = ScriptedDetector::new(vec![(
        640,
        vec![raw(64, 64, 32, 32, 0.9), raw(576, 576, 32, 32, 0.8)],
    )]);

    let pipeline = FusionPipeline::new(FusionConfig::default()).unwrap();
    let result = pipeline.run(&tray, &detector).unwrap();
    assert_eq!(result.boxes.len(), 2);

    // Shrink the workspace so only the first cap is reachable
    let config = ArmConfig {
        workspace: WorkspaceLimits {
            x_max: 300.0,
            y_max: 300.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut arm = ArmSimulator::new(config);
    let report = arm.pick_all(&result.boxes);

    assert_eq!(report.attempted, 2);
    assert_eq!(report.picked, 1);
    assert_eq!(report.skipped, 1);
}
