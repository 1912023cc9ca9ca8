//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three feature strides followed by greedy NMS.
//! Input frames are grayscale; the single channel is replicated to RGB.

use crate::types::{FaceBox, Region};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector model has {0} outputs, expected 9 (score/bbox/kps per stride)")]
    UnexpectedOutputs(usize),
    #[error("detection failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied when fitting a frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point in model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    landmarks: Option<[(f32, f32); 5]>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    fn into_face_box(self, width: u32, height: u32) -> FaceBox {
        let clamp_x = |v: f32| v.round().clamp(0.0, width as f32) as i32;
        let clamp_y = |v: f32| v.round().clamp(0.0, height as f32) as i32;
        FaceBox {
            region: Region::new(
                clamp_x(self.x1),
                clamp_y(self.y1),
                clamp_x(self.x2),
                clamp_y(self.y2),
            ),
            score: self.score,
            landmarks: self.landmarks,
        }
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// `(score, bbox, kps)` output indices for each stride.
    outputs: [(usize, usize, usize); 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::UnexpectedOutputs(names.len()));
        }
        let outputs = output_layout(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD detector");

        Ok(Self { session, outputs })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(width, height);
        let input = to_tensor(image, &letterbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[slot];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data.to_vec())
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}"))
                    })
            };
            let scores = extract(score_idx, "scores")?;
            let bboxes = extract(bbox_idx, "bboxes")?;
            let kps = extract(kps_idx, "landmarks")?;
            decode_stride(&scores, &bboxes, &kps, stride, &letterbox, &mut candidates);
        }

        Ok(suppress(candidates)
            .into_iter()
            .map(|c| c.into_face_box(width, height))
            .filter(|f| f.region.width() > 0 && f.region.height() > 0)
            .collect())
    }
}

/// Resolve output ordering from tensor names (`score_8`, `bbox_16`, ...),
/// falling back to the standard positional export order.
fn output_layout(names: &[String]) -> [(usize, usize, usize); 3] {
    let position = |kind: &str, stride: u32| {
        names.iter().position(|n| *n == format!("{kind}_{stride}"))
    };

    let mut layout = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (position("score", stride), position("bbox", stride), position("kps", stride)) {
            (Some(s), Some(b), Some(k)) => layout[slot] = (s, b, k),
            _ => return [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
        }
    }
    layout
}

fn to_tensor(image: &GrayImage, letterbox: &Letterbox) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let new_w = ((width as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding is the mean, which normalizes to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as u32, letterbox.pad_y as u32);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + ox) as usize, (y + oy) as usize);
        if tx >= size || ty >= size {
            continue;
        }
        let v = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = v;
        }
    }
    tensor
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: u32,
    letterbox: &Letterbox,
    out: &mut Vec<Candidate>,
) {
    let grid_w = (INPUT_SIZE / stride) as usize;
    let grid_h = grid_w;
    let s = stride as f32;

    for idx in 0..grid_w * grid_h * ANCHORS_PER_CELL {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCORE_THRESHOLD {
            continue;
        }
        let Some(b) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let ax = (cell % grid_w) as f32 * s;
        let ay = (cell / grid_w) as f32 * s;

        let (x1, y1) = letterbox.unmap(ax - b[0] * s, ay - b[1] * s);
        let (x2, y2) = letterbox.unmap(ax + b[2] * s, ay + b[3] * s);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
        });

        out.push(Candidate { x1, y1, x2, y2, score, landmarks });
    }
}

/// Greedy non-maximum suppression; returns survivors by descending score.
fn suppress(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| k.iou(&c) <= NMS_IOU) {
            keep.push(c);
        }
    }
    keep
}
