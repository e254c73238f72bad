use crate::services::client::{ClientError, ResultArrays};
use image::{DynamicImage, GrayImage, Rgb, RgbImage, RgbaImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_circle_mut};
use ndarray::{ArrayD, Axis};
use std::path::Path;

const KEYPOINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Rebuild an image from an `(H, W)`, `(H, W, 3)` or `(H, W, 4)` pixel array
pub fn pixels_to_image(pixels: &ArrayD<f64>) -> Option<DynamicImage> {
    let raw: Vec<u8> = pixels.iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect();

    match *pixels.shape() {
        [h, w] => GrayImage::from_raw(w as u32, h as u32, raw).map(DynamicImage::ImageLuma8),
        [h, w, 3] => RgbImage::from_raw(w as u32, h as u32, raw).map(DynamicImage::ImageRgb8),
        [h, w, 4] => RgbaImage::from_raw(w as u32, h as u32, raw).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

/// Draw every `(x, y)` row of `keypoints` onto a color copy of `image`
pub fn draw_keypoints(image: &DynamicImage, keypoints: &ArrayD<f64>) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let radius = (canvas.width().min(canvas.height()) / 100).max(2) as i32;

    if keypoints.ndim() == 2 && keypoints.shape()[1] >= 2 {
        for row in keypoints.axis_iter(Axis(0)) {
            let (x, y) = (row[[0]].round() as i32, row[[1]].round() as i32);
            draw_hollow_circle_mut(&mut canvas, (x, y), radius, KEYPOINT_COLOR);
            draw_cross_mut(&mut canvas, KEYPOINT_COLOR, x, y);
        }
    }

    canvas
}

/// Render an extraction result to `output`
///
/// Uses the returned `image_orig` when present, the local `source` image otherwise.
pub fn save_keypoints<P: AsRef<Path>>(
    result: &ResultArrays,
    source: &Path,
    output: P,
) -> Result<(), ClientError> {
    let keypoints = result
        .get("keypoints_orig")
        .or_else(|| result.get("keypoints"))
        .ok_or_else(|| ClientError::InvalidResponse("no keypoints to draw".into()))?;

    let image = match result.get("image_orig").and_then(pixels_to_image) {
        Some(image) => image,
        None => image::open(source).map_err(|source_err| ClientError::Image {
            path: source.display().to_string(),
            source: source_err,
        })?,
    };

    let output = output.as_ref();
    draw_keypoints(&image, keypoints)
        .save(output)
        .map_err(|source| ClientError::Image {
            path: output.display().to_string(),
            source,
        })
}
