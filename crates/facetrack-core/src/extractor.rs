//! Embedding extraction seam and the `recognize` entry point.

use crate::matcher::Matcher;
use crate::registry::EncodingRegistry;
use crate::types::{Encoding, MatchResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model file not found: {0} (download it from insightface)")]
    ModelNotFound(String),
    #[error("invalid image data: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns raw image bytes into a face encoding.
pub trait Extractor {
    /// Returns `Ok(None)` when the image holds no usable face.
    fn extract(&mut self, image: &[u8]) -> Result<Option<Encoding>, ExtractError>;
}

impl<E: Extractor + ?Sized> Extractor for Box<E> {
    fn extract(&mut self, image: &[u8]) -> Result<Option<Encoding>, ExtractError> {
        (**self).extract(image)
    }
}

/// Outcome of a recognition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// The extractor found no face in the image.
    NoFace,
    /// A face was encoded and compared against the registry.
    Scanned(MatchResult),
}

impl Recognition {
    pub fn detected(&self) -> bool {
        matches!(self, Self::Scanned(_))
    }

    pub fn result(&self) -> MatchResult {
        match self {
            Self::NoFace => MatchResult::no_match(),
            Self::Scanned(result) => result.clone(),
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NoFace => "No face detected in image",
            Self::Scanned(r) if r.matched => "Match found",
            Self::Scanned(_) => "No match found",
        }
    }
}

/// Extract an encoding from `image` and match it against `registry`.
pub fn recognize<E, M>(
    extractor: &mut E,
    image: &[u8],
    registry: &EncodingRegistry,
    matcher: &M,
) -> Result<Recognition, ExtractError>
where
    E: Extractor + ?Sized,
    M: Matcher + ?Sized,
{
    let Some(probe) = extractor.extract(image)? else {
        tracing::debug!("recognize: no face in image");
        return Ok(Recognition::NoFace);
    };
    Ok(Recognition::Scanned(matcher.compare(&probe, registry)))
}
