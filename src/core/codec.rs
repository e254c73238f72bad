use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, GrayImage, ImageFormat};
use ndarray::{ArrayD, IxDyn};
use std::io::Cursor;
use thiserror::Error;

/// Errors that can occur while turning transport bytes into pixels and back
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Cannot decode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Empty image payload")]
    Empty,

    #[error("Pixel buffer does not match image shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Decode an encoded image (PNG, JPEG) held in memory
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Decode a base64 string carrying an encoded image
pub fn decode_base64_image(data: &str) -> Result<DynamicImage, DecodeError> {
    let bytes = STANDARD.decode(data.trim())?;
    decode_image(&bytes)
}

/// Encode a grayscale image as lossless PNG, then as standard base64
pub fn encode_png_base64(image: &GrayImage) -> Result<String, DecodeError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

/// Pixels as an `(H, W)` array for single-channel images, `(H, W, C)` otherwise
pub fn image_to_pixels(image: &DynamicImage) -> Result<ArrayD<u8>, DecodeError> {
    let (w, h) = (image.width() as usize, image.height() as usize);

    let array = match image.color().channel_count() {
        1 => ArrayD::from_shape_vec(IxDyn(&[h, w]), image.to_luma8().into_raw())?,
        2 | 4 => ArrayD::from_shape_vec(IxDyn(&[h, w, 4]), image.to_rgba8().into_raw())?,
        _ => ArrayD::from_shape_vec(IxDyn(&[h, w, 3]), image.to_rgb8().into_raw())?,
    };

    Ok(array)
}
