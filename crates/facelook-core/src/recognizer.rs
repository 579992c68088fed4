//! Recognition service: detector + reference database + matcher.

use crate::database::ReferenceDatabase;
use crate::detector::{DetectorError, FaceDetector};
use crate::extractor;
use crate::matcher::{MatchError, Matcher, MseMatcher};
use crate::types::MatchResult;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("match error: {0}")]
    Match(#[from] MatchError),
}

/// Owns a detector and a read-only reference database.
///
/// Constructed once at startup and handed to whichever shell drives it.
pub struct Recognizer<D, M = MseMatcher> {
    detector: D,
    database: ReferenceDatabase,
    matcher: M,
}

impl<D: FaceDetector> Recognizer<D> {
    pub fn new(detector: D, database: ReferenceDatabase) -> Self {
        Self::with_matcher(detector, database, MseMatcher)
    }
}

impl<D: FaceDetector, M: Matcher> Recognizer<D, M> {
    pub fn with_matcher(detector: D, database: ReferenceDatabase, matcher: M) -> Self {
        Self {
            detector,
            database,
            matcher,
        }
    }

    pub fn database(&self) -> &ReferenceDatabase {
        &self.database
    }

    /// One result per detected face, in detector order.
    ///
    /// Detections whose clamped box is empty are dropped.
    pub fn recognize(&mut self, image: &RgbImage) -> Result<Vec<MatchResult>, RecognizeError> {
        let detections = self.detector.detect(image)?;
        let mut results = Vec::with_capacity(detections.len());

        for detection in &detections {
            let Some((bbox, crop)) = extractor::crop_detection(image, detection) else {
                tracing::debug!(
                    bbox = ?detection.bbox,
                    "detection clamps to an empty box, skipping"
                );
                continue;
            };
            let result = self
                .matcher
                .compare(&crop, self.database.entries(), bbox)?;
            tracing::debug!(
                label = %result.label,
                dissimilarity = result.dissimilarity,
                x = bbox.x,
                y = bbox.y,
                "face matched"
            );
            results.push(result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::UNKNOWN_LABEL;
    use crate::types::{Detection, PixelBox, ReferenceEntry, RelativeBox};
    use image::Rgb;

    struct Fixed(Vec<Detection>);

    impl FaceDetector for Fixed {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn det(xmin: f32, ymin: f32, width: f32, height: f32) -> Detection {
        Detection {
            bbox: RelativeBox { xmin, ymin, width, height },
            confidence: 0.9,
        }
    }

    /// Left half red, right half blue.
    fn two_tone() -> RgbImage {
        RgbImage::from_fn(100, 50, |x, _| {
            if x < 50 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    fn reference(label: &str, color: [u8; 3]) -> ReferenceEntry {
        let image = RgbImage::from_pixel(10, 10, Rgb(color));
        let crop = extractor::crop_face(&image, &PixelBox { x: 0, y: 0, width: 10, height: 10 });
        ReferenceEntry { label: label.into(), crop }
    }

    #[test]
    fn test_recognize_every_detection_in_order() {
        let db = ReferenceDatabase::new(vec![
            reference("red", [255, 0, 0]),
            reference("blue", [0, 0, 255]),
        ]);
        let detector = Fixed(vec![det(0.5, 0.0, 0.5, 1.0), det(0.0, 0.0, 0.5, 1.0)]);
        let mut recognizer = Recognizer::new(detector, db);

        let results = recognizer.recognize(&two_tone()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].label, "blue");
        assert_eq!(results[0].bbox, PixelBox { x: 50, y: 0, width: 50, height: 50 });
        assert_eq!(results[1].label, "red");
        assert!(results[1].dissimilarity < 1e-4);
    }

    #[test]
    fn test_recognize_unknown_face() {
        let db = ReferenceDatabase::new(vec![reference("green", [0, 255, 0])]);
        let mut recognizer = Recognizer::new(Fixed(vec![det(0.0, 0.0, 0.5, 1.0)]), db);

        let results = recognizer.recognize(&two_tone()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, UNKNOWN_LABEL);
        assert!(results[0].dissimilarity >= 0.1);
    }

    #[test]
    fn test_recognize_empty_database() {
        let detector = Fixed(vec![det(0.0, 0.0, 1.0, 1.0)]);
        let mut recognizer = Recognizer::new(detector, ReferenceDatabase::default());
        let results = recognizer.recognize(&two_tone()).unwrap();
        assert_eq!(results[0].label, UNKNOWN_LABEL);
        assert_eq!(results[0].dissimilarity, f32::INFINITY);
    }

    #[test]
    fn test_recognize_skips_degenerate_boxes() {
        let detector = Fixed(vec![det(1.2, 0.0, 0.3, 0.3), det(0.0, 0.0, 0.5, 1.0)]);
        let mut recognizer = Recognizer::new(detector, ReferenceDatabase::default());
        let results = recognizer.recognize(&two_tone()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bbox.x, 0);
    }

    #[test]
    fn test_recognize_propagates_detector_failure() {
        struct Failing;

        impl FaceDetector for Failing {
            fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
                Err(DetectorError::InferenceFailed("session closed".into()))
            }
        }

        let mut recognizer = Recognizer::new(Failing, ReferenceDatabase::default());
        match recognizer.recognize(&two_tone()).unwrap_err() {
            RecognizeError::Detector(DetectorError::InferenceFailed(msg)) => {
                assert_eq!(msg, "session closed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_recognize_no_faces() {
        let mut recognizer = Recognizer::new(Fixed(vec![]), ReferenceDatabase::default());
        assert!(recognizer.recognize(&two_tone()).unwrap().is_empty());
    }
}
