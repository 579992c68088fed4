use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Side length of a normalized face crop, in pixels.
pub const CROP_SIZE: u32 = 224;
/// Color channels per crop pixel (RGB).
pub const CROP_CHANNELS: usize = 3;
/// Number of values in a well-formed crop (224 × 224 × 3).
pub const CROP_LEN: usize = (CROP_SIZE as usize) * (CROP_SIZE as usize) * CROP_CHANNELS;

/// Face bounding box in image-relative coordinates (fractions of width/height),
/// as reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

/// A single detector hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: RelativeBox,
    pub confidence: f32,
}

/// Face bounding box in pixel coordinates, already clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Normalized 224×224 RGB face crop, channel values in [0.0, 1.0].
///
/// Values are stored row-major, interleaved `[r, g, b, r, g, b, ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceCrop {
    values: Vec<f32>,
}

impl FaceCrop {
    /// Normalize an already-resized 224×224 RGB image.
    pub(crate) fn from_resized(image: &RgbImage) -> Self {
        debug_assert_eq!(image.dimensions(), (CROP_SIZE, CROP_SIZE));
        let values = image.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self { values }
    }

    /// Wrap raw values without shape validation.
    ///
    /// Used when reloading a cache; the matcher rejects crops whose length
    /// differs from [`CROP_LEN`].
    pub fn from_raw(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if this crop has the fixed 224×224×3 shape.
    pub fn has_crop_shape(&self) -> bool {
        self.values.len() == CROP_LEN
    }

    /// Mean of squared element differences. 0.0 = identical.
    ///
    /// Both crops must have the same length; the matcher checks shapes first.
    pub(crate) fn dissimilarity(&self, other: &FaceCrop) -> f32 {
        debug_assert_eq!(
            self.values.len(),
            other.values.len(),
            "dissimilarity of crops with different lengths"
        );
        if self.values.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = (*a as f64) - (*b as f64);
                d * d
            })
            .sum();
        (sum / self.values.len() as f64) as f32
    }
}

/// One labeled reference face.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub label: String,
    pub crop: FaceCrop,
}

/// Outcome of matching one detected face against the reference database.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub bbox: PixelBox,
    /// Matched label, or `"Unknown"`.
    pub label: String,
    /// Minimum dissimilarity over the database; `f32::INFINITY` if it was empty.
    pub dissimilarity: f32,
    /// Index of the matched reference entry (only set below the threshold).
    pub entry_index: Option<usize>,
}

impl MatchResult {
    pub fn is_known(&self) -> bool {
        self.entry_index.is_some()
    }

    /// `1 - dissimilarity`. Not a probability and not clamped.
    pub fn confidence(&self) -> f32 {
        1.0 - self.dissimilarity
    }

    pub fn to_report(&self) -> FaceReport {
        let confidence = self.confidence();
        FaceReport {
            x: self.bbox.x,
            y: self.bbox.y,
            width: self.bbox.width,
            height: self.bbox.height,
            label: self.label.clone(),
            confidence: confidence.is_finite().then_some(confidence),
        }
    }
}

/// JSON shape of one recognized face, shared by the HTTP and CLI shells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceReport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub label: String,
    /// `None` when the database was empty (dissimilarity is infinite).
    pub confidence: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_from_resized_normalizes() {
        let img = RgbImage::from_pixel(CROP_SIZE, CROP_SIZE, Rgb([255, 0, 51]));
        let crop = FaceCrop::from_resized(&img);
        assert!(crop.has_crop_shape());
        assert_eq!(&crop.values()[..3], &[1.0, 0.0, 0.2]);
        assert!(crop.values().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_dissimilarity_identical() {
        let a = FaceCrop::from_raw(vec![0.1, 0.5, 0.9]);
        assert_eq!(a.dissimilarity(&a.clone()), 0.0);
    }

    #[test]
    fn test_dissimilarity_mean_of_squares() {
        let a = FaceCrop::from_raw(vec![0.0, 0.0, 0.0, 0.0]);
        let b = FaceCrop::from_raw(vec![1.0, 0.0, 0.5, 0.0]);
        // (1 + 0 + 0.25 + 0) / 4
        assert!((a.dissimilarity(&b) - 0.3125).abs() < 1e-6);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "different lengths")]
    fn test_dissimilarity_rejects_length_mismatch() {
        let a = FaceCrop::from_raw(vec![]);
        let b = FaceCrop::from_raw(vec![1.0, 1.0]);
        a.dissimilarity(&b);
    }

    #[test]
    fn test_report_confidence_for_empty_database() {
        let result = MatchResult {
            bbox: PixelBox { x: 1, y: 2, width: 3, height: 4 },
            label: "Unknown".into(),
            dissimilarity: f32::INFINITY,
            entry_index: None,
        };
        let report = result.to_report();
        assert_eq!(report.confidence, None);
        assert_eq!(report.label, "Unknown");
    }

    #[test]
    fn test_confidence_can_go_negative() {
        let result = MatchResult {
            bbox: PixelBox { x: 0, y: 0, width: 1, height: 1 },
            label: "Unknown".into(),
            dissimilarity: 1.5,
            entry_index: None,
        };
        assert!((result.confidence() + 0.5).abs() < 1e-6);
    }
}
