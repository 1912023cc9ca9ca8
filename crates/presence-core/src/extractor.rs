//! Feature extraction seam.
//!
//! The recognition core only sees [`Extractor`]: an image in, face boxes or
//! probes out. [`OnnxExtractor`] is the production implementation built on
//! the SCRFD detector and the ArcFace embedder.

use crate::detector::{DetectorError, FaceDetector};
use crate::matcher::Metric;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{FaceBox, Probe};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns an image into face locations and identity embeddings.
pub trait Extractor {
    /// Locate faces without embedding them (cheap preview path).
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, ExtractError>;

    /// Locate and embed every face, in detector order (best first).
    fn extract(&mut self, image: &GrayImage) -> Result<Vec<Probe>, ExtractError>;

    /// Distance the embeddings are calibrated for.
    fn metric(&self) -> Metric {
        Metric::Euclidean
    }
}

/// SCRFD + ArcFace pipeline.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL))?;
        Ok(Self { detector, recognizer })
    }
}

impl Extractor for OnnxExtractor {
    fn metric(&self) -> Metric {
        Metric::Cosine
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, ExtractError> {
        Ok(self.detector.detect(image)?)
    }

    fn extract(&mut self, image: &GrayImage) -> Result<Vec<Probe>, ExtractError> {
        let faces = self.detector.detect(image)?;
        let mut probes = Vec::with_capacity(faces.len());
        for face in faces {
            match self.recognizer.embed(image, &face) {
                Ok(embedding) => probes.push(Probe { embedding, region: face.region }),
                Err(RecognizerError::EmptyCrop(region)) => {
                    tracing::debug!(?region, "skipping face outside frame");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(probes)
    }
}
