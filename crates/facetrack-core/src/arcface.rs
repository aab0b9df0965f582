//! ArcFace embedding extractor via ONNX Runtime.
//!
//! Decodes any format the `image` crate reads, converts it to grayscale and
//! asks the face locator for candidates. The largest face is cropped, resized
//! to 112x112 and embedded with the w600k_r50 model into an L2-normalized
//! 512-dimensional encoding.

use crate::detector::{FaceBox, FaceLocator, ScrfdDetector};
use crate::extractor::{ExtractError, Extractor};
use crate::types::Encoding;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants ---
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Faces smaller than this on either side are ignored.
const MIN_FACE_SIZE: u32 = 30;

pub struct ArcFaceExtractor {
    session: Session,
    detector: ScrfdDetector,
}

impl ArcFaceExtractor {
    /// Load the ArcFace model and the SCRFD detector that feeds it.
    pub fn load(model_path: &Path, detector_path: &Path) -> Result<Self, ExtractError> {
        let detector = ScrfdDetector::load(detector_path)?;

        if !model_path.exists() {
            return Err(ExtractError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session, detector })
    }

    /// Decode an image, find the largest face and resize it to the network's input size.
    ///
    /// Returns `None` when no face of at least `MIN_FACE_SIZE` is found.
    fn prepare<L: FaceLocator + ?Sized>(
        locator: &mut L,
        image: &[u8],
    ) -> Result<Option<Vec<u8>>, ExtractError> {
        let gray = image::load_from_memory(image)?.to_luma8();
        if gray.width() < MIN_FACE_SIZE || gray.height() < MIN_FACE_SIZE {
            tracing::debug!(
                width = gray.width(),
                height = gray.height(),
                "image below minimum face size"
            );
            return Ok(None);
        }

        let faces = locator.locate(&gray)?;
        let Some(face) = largest_face(&faces).and_then(|face| crop_face(&gray, face)) else {
            tracing::debug!(candidates = faces.len(), "no face found");
            return Ok(None);
        };

        let size = ARCFACE_INPUT_SIZE as u32;
        let resized = image::imageops::resize(&face, size, size, FilterType::Triangle);
        Ok(Some(resized.into_raw()))
    }

    /// Preprocess a 112x112 grayscale face crop into a NCHW float tensor.
    fn preprocess(face: &[u8]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = face.get(y * size + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}

impl Extractor for ArcFaceExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Option<Encoding>, ExtractError> {
        let Some(face) = Self::prepare(&mut self.detector, image)? else {
            return Ok(None);
        };
        let input = Self::preprocess(&face);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(ExtractError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(l2_normalize(raw).map(Encoding::new))
    }
}

/// Largest candidate whose sides are both at least `MIN_FACE_SIZE`.
fn largest_face(faces: &[FaceBox]) -> Option<&FaceBox> {
    let min = MIN_FACE_SIZE as f32;
    faces
        .iter()
        .filter(|f| f.width >= min && f.height >= min)
        .max_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(std::cmp::Ordering::Equal))
}

/// Cut `face` out of the image, clamped to its bounds.
fn crop_face(gray: &GrayImage, face: &FaceBox) -> Option<GrayImage> {
    let (width, height) = gray.dimensions();
    let x1 = face.x.max(0.0).min(width as f32) as u32;
    let y1 = face.y.max(0.0).min(height as f32) as u32;
    let x2 = (face.x + face.width).max(0.0).min(width as f32) as u32;
    let y2 = (face.y + face.height).max(0.0).min(height as f32) as u32;
    if x2.saturating_sub(x1) < MIN_FACE_SIZE || y2.saturating_sub(y1) < MIN_FACE_SIZE {
        return None;
    }
    Some(image::imageops::crop_imm(gray, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// L2-normalize a raw embedding. A zero or non-finite norm means nothing usable was seen.
fn l2_normalize(raw: Vec<f32>) -> Option<Vec<f32>> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        Some(raw.iter().map(|x| x / norm).collect())
    } else {
        None
    }
}
