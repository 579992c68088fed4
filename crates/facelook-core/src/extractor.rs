//! Face crop extraction.
//!
//! Converts detector output into fixed-size normalized [`FaceCrop`]s:
//! relative box → clamped pixel box → sub-image → 224×224 bilinear resize →
//! channel values divided by 255.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::{Detection, FaceCrop, PixelBox, RelativeBox, CROP_SIZE};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Convert a relative box to pixels with `floor(relative * dimension)`,
/// clamped to `[0, dimension)`.
///
/// Returns `None` when the clamped box has zero area.
pub fn pixel_box(rel: &RelativeBox, image_width: u32, image_height: u32) -> Option<PixelBox> {
    let (x0, x1) = clamp_span(rel.xmin, rel.width, image_width)?;
    let (y0, y1) = clamp_span(rel.ymin, rel.height, image_height)?;
    Some(PixelBox {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}

/// Clamp one axis to `[0, dim]` and return `(start, end)` if non-empty.
fn clamp_span(start: f32, extent: f32, dim: u32) -> Option<(u32, u32)> {
    let d = dim as f32;
    // `as i64` saturates and maps NaN to 0.
    let begin = (start * d).floor() as i64;
    let len = (extent * d).floor() as i64;
    let end = begin.saturating_add(len);

    let begin = begin.clamp(0, dim as i64) as u32;
    let end = end.clamp(0, dim as i64) as u32;
    (end > begin).then_some((begin, end))
}

/// Crop `bbox` out of `image`, resize to 224×224 and normalize.
pub fn crop_face(image: &RgbImage, bbox: &PixelBox) -> FaceCrop {
    let region = imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    let resized = imageops::resize(&region, CROP_SIZE, CROP_SIZE, FilterType::Triangle);
    FaceCrop::from_resized(&resized)
}

/// Pixel box and crop for one detection, or `None` for a zero-area box.
pub fn crop_detection(image: &RgbImage, detection: &Detection) -> Option<(PixelBox, FaceCrop)> {
    let (width, height) = image.dimensions();
    let bbox = pixel_box(&detection.bbox, width, height)?;
    Some((bbox, crop_face(image, &bbox)))
}

/// Extract a crop from the first face the detector reports.
///
/// Returns `Ok(None)` when no face is found (or the first box is degenerate).
/// Only detector failures are errors.
pub fn extract<D: FaceDetector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
) -> Result<Option<FaceCrop>, DetectorError> {
    let detections = detector.detect(image)?;
    let Some(first) = detections.first() else {
        return Ok(None);
    };
    if detections.len() > 1 {
        tracing::debug!(faces = detections.len(), "multiple faces found, using the first");
    }
    Ok(crop_detection(image, first).map(|(_, crop)| crop))
}
