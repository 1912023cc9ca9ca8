//! ArcFace face embedder via ONNX Runtime.
//!
//! Aligns the face on its five landmarks (or, without landmarks, crops a
//! square around the detector box) to 112x112 and produces an
//! L2-normalized 512-d embedding.

use crate::align::{align_face, ALIGNED_SIZE};
use crate::types::{Embedding, FaceBox, Region};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = ALIGNED_SIZE;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Extra context around the detector box, as a fraction of its longer side.
const CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognizer model not found: {0}")]
    ModelNotFound(String),
    #[error("face region {0:?} lies outside the frame")]
    EmptyCrop(Region),
    #[error("embedding failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace recognizer");
        Ok(Self { session })
    }

    /// Embed `face` as found in `image`.
    pub fn embed(
        &mut self,
        image: &GrayImage,
        face: &FaceBox,
    ) -> Result<Embedding, RecognizerError> {
        let input = to_tensor(&face_input(image, face)?);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(e.to_string()))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// The 112x112 model input for `face`: landmark-aligned when the detector
/// supplied landmarks, a box crop otherwise.
fn face_input(image: &GrayImage, face: &FaceBox) -> Result<GrayImage, RecognizerError> {
    face.landmarks
        .and_then(|landmarks| align_face(image, &landmarks))
        .or_else(|| crop_face(image, &face.region))
        .ok_or(RecognizerError::EmptyCrop(face.region))
}

/// Square crop centred on `region`, expanded by the margin and clipped to
/// the frame, resized to the model input.
fn crop_face(image: &GrayImage, region: &Region) -> Option<GrayImage> {
    let (width, height) = image.dimensions();
    let side = region.width().max(region.height()) as f32 * (1.0 + 2.0 * CROP_MARGIN);
    let cx = (region.left + region.right) as f32 / 2.0;
    let cy = (region.top + region.bottom) as f32 / 2.0;

    let x0 = (cx - side / 2.0).max(0.0) as u32;
    let y0 = (cy - side / 2.0).max(0.0) as u32;
    let x1 = ((cx + side / 2.0).max(0.0) as u32).min(width);
    let y1 = ((cy + side / 2.0).max(0.0) as u32).min(height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    let crop = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

fn to_tensor(face: &GrayImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        let v = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = v;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
