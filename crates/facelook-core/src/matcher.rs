//! Reference matching by pixel mean squared error.

use crate::types::{FaceCrop, MatchResult, PixelBox, ReferenceEntry, CROP_LEN};
use thiserror::Error;

/// A best match is accepted only if its dissimilarity is strictly below this.
pub const MATCH_THRESHOLD: f32 = 0.1;

/// Label reported when no reference entry is close enough.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("crop shape mismatch for {label:?}: expected {expected} values, got {actual}")]
    ShapeMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Strategy for comparing a query crop against the reference entries.
pub trait Matcher {
    fn compare(
        &self,
        query: &FaceCrop,
        gallery: &[ReferenceEntry],
        bbox: PixelBox,
    ) -> Result<MatchResult, MatchError>;
}

/// Linear-scan MSE matcher.
///
/// The first entry reaching the minimum dissimilarity wins ties.
#[derive(Debug, Default, Clone, Copy)]
pub struct MseMatcher;

impl Matcher for MseMatcher {
    fn compare(
        &self,
        query: &FaceCrop,
        gallery: &[ReferenceEntry],
        bbox: PixelBox,
    ) -> Result<MatchResult, MatchError> {
        if !query.has_crop_shape() {
            return Err(MatchError::ShapeMismatch {
                label: "<query>".into(),
                expected: CROP_LEN,
                actual: query.len(),
            });
        }

        let mut best = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if !entry.crop.has_crop_shape() {
                return Err(MatchError::ShapeMismatch {
                    label: entry.label.clone(),
                    expected: CROP_LEN,
                    actual: entry.crop.len(),
                });
            }
            let d = query.dissimilarity(&entry.crop);
            if d < best {
                best = d;
                best_idx = Some(i);
            }
        }

        Ok(match best_idx {
            Some(idx) if best < MATCH_THRESHOLD => MatchResult {
                bbox,
                label: gallery[idx].label.clone(),
                dissimilarity: best,
                entry_index: Some(idx),
            },
            _ => MatchResult {
                bbox,
                label: UNKNOWN_LABEL.to_string(),
                dissimilarity: best,
                entry_index: None,
            },
        })
    }
}
