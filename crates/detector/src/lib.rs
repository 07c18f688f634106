//! Mushroom detection using a YOLO-family model via ONNX Runtime
//!
//! Wraps an exported YOLO model (v5/v8 style single-tensor output) behind
//! the shared [`Detector`] capability. Straw mushrooms have no COCO class
//! of their own, so by default detections are filtered to class 32
//! ("sports ball"), whose round silhouette matches a mushroom cap closely
//! enough for tray work.
//!
//! The session lives behind a mutex because `Session::run` needs `&mut`,
//! while the `Detector` contract takes `&self` so one detector can be
//! shared across scales and caller threads.
//!
//! # Example
//! ```no_run
//! use harvest_common::Detector;
//! use harvest_detector::{DetectorConfig, OnnxDetector};
//! use image::open;
//!
//! # fn main() -> anyhow::Result<()> {
//! let detector = OnnxDetector::new("yolov5s.onnx", DetectorConfig::default())?;
//! let img = open("tray.jpg")?.to_rgb8();
//! let detections = detector.detect(&img)?;
//! println!("{} caps found", detections.len());
//! # Ok(())
//! # }
//! ```

use harvest_common::{Detector, RawDetection, VisionError};
use image::RgbImage;
use ndarray::Array;
use ort::{
    session::{Session, SessionOutputs},
    value::TensorRef,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration for the ONNX detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum class confidence for a candidate box (0.0-1.0)
    pub confidence_threshold: f32,
    /// IoU threshold for the per-invocation NMS (0.0-1.0)
    pub iou_threshold: f32,
    /// Restrict detections to these class IDs (None = all classes)
    pub target_classes: Option<Vec<u32>>,
    /// Maximum number of detections returned per invocation
    pub max_detections: usize,
    /// Square model input size in pixels
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3, // Low threshold favors recall in dense trays
            iou_threshold: 0.3,
            target_classes: Some(vec![MUSHROOM_PROXY_CLASS]),
            max_detections: 300,
            input_size: 640,
        }
    }
}

/// COCO class standing in for mushroom caps ("sports ball")
pub const MUSHROOM_PROXY_CLASS: u32 = 32;

/// Detector errors
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Detector session lock poisoned")]
    SessionPoisoned,

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::Error),
}

impl From<DetectorError> for VisionError {
    fn from(err: DetectorError) -> Self {
        VisionError::Detector(err.to_string())
    }
}

/// A decoded box in model-input pixel coordinates, pre-NMS
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    confidence: f32,
    class_id: u32,
}

impl Candidate {
    fn area(&self) -> f32 {
        self.w * self.h
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// YOLO ONNX detector implementing the shared [`Detector`] capability
pub struct OnnxDetector {
    session: Mutex<Session>,
    config: DetectorConfig,
}

impl OnnxDetector {
    /// Load an ONNX model and build a detector around it
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` if the session cannot be built from the file.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        info!("Loading detection model from {:?}", model_path.as_ref());

        let session = Session::builder()
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;

        info!("Detection model loaded");

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    fn run_model(&self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectorError> {
        debug!(
            "Running detection on {}x{} image",
            image.width(),
            image.height()
        );

        let input = self.preprocess(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::SessionPoisoned)?;

        let input_tensor = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![input_tensor])?;

        self.postprocess(&outputs, image.width(), image.height())
    }

    /// Resize to the square model input and convert to a normalized CHW
    /// tensor
    fn preprocess(&self, image: &RgbImage) -> Array<f32, ndarray::Dim<[usize; 4]>> {
        let input_size = self.config.input_size;
        let resized = image::imageops::resize(
            image,
            input_size,
            input_size,
            image::imageops::FilterType::Triangle,
        );

        let mut input = Array::zeros((1, 3, input_size as usize, input_size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
            }
        }
        input
    }

    fn postprocess(
        &self,
        outputs: &SessionOutputs,
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<RawDetection>, DetectorError> {
        // Single-tensor YOLO output: (batch, 4 + classes, anchors), box
        // rows in center format
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("Failed to extract tensor: {e}")))?;

        let dims = shape.as_ref();
        if dims.len() != 3 {
            return Err(DetectorError::Inference(format!(
                "Expected 3D output tensor, got {}D",
                dims.len()
            )));
        }
        let num_features = dims[1] as usize;
        let num_anchors = dims[2] as usize;
        if num_features < 5 {
            return Err(DetectorError::Inference(format!(
                "Output has {num_features} features, need box coords plus at least one class"
            )));
        }

        let candidates = decode_output(data, num_features, num_anchors, &self.config);
        debug!("Decoded {} candidates before NMS", candidates.len());

        let kept = nms(candidates, self.config.iou_threshold);
        let kept: Vec<_> = kept
            .into_iter()
            .take(self.config.max_detections)
            .collect();

        let detections = to_image_frame(&kept, self.config.input_size, image_width, image_height);
        info!("Detected {} objects", detections.len());
        Ok(detections)
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, image: &RgbImage) -> harvest_common::Result<Vec<RawDetection>> {
        Ok(self.run_model(image)?)
    }
}

/// Decode the raw output tensor into thresholded, class-filtered
/// candidates in model-input pixel coordinates
fn decode_output(
    data: &[f32],
    num_features: usize,
    num_anchors: usize,
    config: &DetectorConfig,
) -> Vec<Candidate> {
    let num_classes = num_features - 4;
    let mut candidates = Vec::with_capacity(num_anchors / 10);

    for anchor in 0..num_anchors {
        // Layout is (feature, anchor), so feature f of anchor a sits at
        // f * num_anchors + a
        let feature = |f: usize| data[f * num_anchors + anchor];

        let mut best_prob = 0.0f32;
        let mut best_class = 0usize;
        for class in 0..num_classes {
            let prob = feature(4 + class);
            if prob > best_prob {
                best_prob = prob;
                best_class = class;
            }
        }

        if best_prob < config.confidence_threshold {
            continue;
        }
        if let Some(ref classes) = config.target_classes {
            if !classes.contains(&(best_class as u32)) {
                continue;
            }
        }

        let cx = feature(0);
        let cy = feature(1);
        let w = feature(2);
        let h = feature(3);

        candidates.push(Candidate {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            w,
            h,
            confidence: best_prob,
            class_id: best_class as u32,
        });
    }
    candidates
}

/// Greedy same-class non-maximum suppression
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::with_capacity(candidates.len());
    while !candidates.is_empty() {
        let current = candidates.swap_remove(0);
        candidates
            .retain(|c| c.class_id != current.class_id || c.iou(&current) < iou_threshold);
        keep.push(current);
    }
    keep
}

/// Map kept candidates from model-input coordinates into the passed
/// image's pixel frame, truncating to integers
///
/// Boxes are clamped into the image; anything that degenerates is
/// dropped.
fn to_image_frame(
    candidates: &[Candidate],
    input_size: u32,
    image_width: u32,
    image_height: u32,
) -> Vec<RawDetection> {
    let scale_x = image_width as f32 / input_size as f32;
    let scale_y = image_height as f32 / input_size as f32;

    let mut out = Vec::with_capacity(candidates.len());
    for c in candidates {
        let x1 = (c.x * scale_x).max(0.0);
        let y1 = (c.y * scale_y).max(0.0);
        let x2 = ((c.x + c.w) * scale_x).min(image_width as f32);
        let y2 = ((c.y + c.h) * scale_y).min(image_height as f32);

        let x = x1 as i32;
        let y = y1 as i32;
        let w = x2 as i32 - x;
        let h = y2 as i32 - y;
        if w <= 0 || h <= 0 {
            continue;
        }

        out.push(RawDetection {
            x,
            y,
            w,
            h,
            confidence: c.confidence,
            class_id: c.class_id,
        });
    }
    out
}

/// Get a COCO class name from a class ID
#[must_use]
pub fn class_name(class_id: u32) -> &'static str {
    COCO_CLASSES
        .get(class_id as usize)
        .copied()
        .unwrap_or("unknown")
}

/// 80 COCO object classes (in order)
pub const COCO_CLASSES: &[&str] = &[
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x: f32, y: f32, w: f32, h: f32, confidence: f32, class_id: u32) -> Candidate {
        Candidate {
            x,
            y,
            w,
            h,
            confidence,
            class_id,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.confidence_threshold, 0.3);
        assert_eq!(config.iou_threshold, 0.3);
        assert_eq!(config.target_classes, Some(vec![32]));
        assert_eq!(config.max_detections, 300);
        assert_eq!(config.input_size, 640);
    }

    #[test]
    fn test_candidate_iou() {
        let a = candidate(0.0, 0.0, 100.0, 100.0, 0.9, 32);
        let b = candidate(50.0, 50.0, 100.0, 100.0, 0.8, 32);
        let iou = a.iou(&b);
        assert!(iou > 0.0 && iou < 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let far = candidate(500.0, 500.0, 10.0, 10.0, 0.8, 32);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_decode_output_thresholds_and_filters() {
        // Two anchors, 4 box features + 2 classes, layout (feature, anchor)
        let num_features = 6;
        let num_anchors = 2;
        #[rustfmt::skip]
        let data = [
            100.0, 300.0,  // cx per anchor
            100.0, 300.0,  // cy
            40.0, 40.0,    // w
            40.0, 40.0,    // h
            0.1, 0.9,      // class 0 prob
            0.8, 0.05,     // class 1 prob
        ];
        let config = DetectorConfig {
            confidence_threshold: 0.5,
            target_classes: None,
            ..Default::default()
        };

        let candidates = decode_output(&data, num_features, num_anchors, &config);
        assert_eq!(candidates.len(), 2);

        // Anchor 0 picks class 1, corner at center - half size
        assert_eq!(candidates[0].class_id, 1);
        assert!((candidates[0].confidence - 0.8).abs() < 1e-6);
        assert!((candidates[0].x - 80.0).abs() < 1e-6);
        assert!((candidates[0].y - 80.0).abs() < 1e-6);

        // Anchor 1 picks class 0
        assert_eq!(candidates[1].class_id, 0);
        assert!((candidates[1].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_output_class_filter() {
        let num_features = 6;
        let num_anchors = 2;
        #[rustfmt::skip]
        let data = [
            100.0, 300.0,
            100.0, 300.0,
            40.0, 40.0,
            40.0, 40.0,
            0.1, 0.9,
            0.8, 0.05,
        ];
        let config = DetectorConfig {
            confidence_threshold: 0.5,
            target_classes: Some(vec![0]),
            ..Default::default()
        };

        let candidates = decode_output(&data, num_features, num_anchors, &config);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 0);
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let kept = nms(
            vec![
                candidate(0.0, 0.0, 100.0, 100.0, 0.9, 32),
                candidate(10.0, 10.0, 100.0, 100.0, 0.7, 32),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_cross_class_overlap() {
        let kept = nms(
            vec![
                candidate(0.0, 0.0, 100.0, 100.0, 0.9, 32),
                candidate(10.0, 10.0, 100.0, 100.0, 0.7, 0),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let kept = nms(
            vec![
                candidate(0.0, 0.0, 50.0, 50.0, 0.9, 32),
                candidate(200.0, 200.0, 50.0, 50.0, 0.8, 32),
                candidate(400.0, 400.0, 50.0, 50.0, 0.7, 32),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_to_image_frame_rescales() {
        let candidates = [candidate(64.0, 64.0, 32.0, 32.0, 0.9, 32)];
        let out = to_image_frame(&candidates, 640, 960, 960);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].x, 96);
        assert_eq!(out[0].y, 96);
        assert_eq!(out[0].w, 48);
        assert_eq!(out[0].h, 48);
    }

    #[test]
    fn test_to_image_frame_clamps_negative_origin() {
        // Box poking out of the top-left corner gets clipped, not dropped
        let candidates = [candidate(-10.0, -10.0, 50.0, 50.0, 0.9, 32)];
        let out = to_image_frame(&candidates, 640, 640, 640);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].x, 0);
        assert_eq!(out[0].y, 0);
        assert_eq!(out[0].w, 40);
        assert_eq!(out[0].h, 40);
    }

    #[test]
    fn test_to_image_frame_drops_degenerate_box() {
        let candidates = [candidate(-100.0, -100.0, 50.0, 50.0, 0.9, 32)];
        let out = to_image_frame(&candidates, 640, 640, 640);
        assert!(out.is_empty());
    }

    #[test]
    fn test_coco_classes() {
        assert_eq!(COCO_CLASSES.len(), 80);
        assert_eq!(COCO_CLASSES[MUSHROOM_PROXY_CLASS as usize], "sports ball");
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(32), "sports ball");
        assert_eq!(class_name(200), "unknown");
    }
}
