//! facetrack-core: face-based attendance engine.
//!
//! Holds the in-memory encoding registry, the mean-confidence match engine,
//! the attendance punch policy and an ArcFace extractor running on ONNX Runtime
//! behind an SCRFD face detector.
//! Persistence is abstracted behind [`EncodingStore`] and [`AttendanceLog`].

pub mod arcface;
pub mod attendance;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod registry;
pub mod shared;
pub mod store;
pub mod types;

pub use arcface::ArcFaceExtractor;
pub use attendance::{punch, AttendanceKind, AttendanceRecord, PunchError, PunchPolicy};
pub use detector::{FaceBox, FaceLocator, ScrfdDetector};
pub use extractor::{recognize, ExtractError, Extractor, Recognition};
pub use matcher::{match_encoding, Matcher, MeanConfidenceMatcher, DEFAULT_MATCH_THRESHOLD};
pub use registry::{EncodingRegistry, RegistryError};
pub use shared::{EnrollOutcome, SharedRegistry, UpdateError};
pub use store::{AttendanceLog, EncodingStore, StoreError};
pub use types::{
    EmployeeDetails, EmployeeId, EmployeeRecord, EmployeeSummary, Encoding, MatchResult,
    RegistryStats,
};

use std::path::PathBuf;

/// Default directory for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("facetrack/models")
}
