//! facelook-core — Face detection, crop extraction and reference matching.
//!
//! Uses SCRFD for face detection via ONNX Runtime. Recognition is a linear
//! scan comparing fixed-size normalized crops by mean squared error.

use std::path::PathBuf;

pub mod database;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use database::{BuildReport, FileOutcome, LoadSource, ReferenceDatabase, CACHE_FILE_NAME};
pub use detector::{FaceDetector, ScrfdDetector};
pub use matcher::{Matcher, MseMatcher, MATCH_THRESHOLD, UNKNOWN_LABEL};
pub use recognizer::Recognizer;
pub use types::{Detection, FaceCrop, MatchResult, PixelBox, ReferenceEntry, RelativeBox};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// Default model directory: `$XDG_DATA_HOME/facelook/models`, falling back
/// to `~/.local/share/facelook/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelook")
        .join("models")
}
