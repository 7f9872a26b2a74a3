//! Base64 payload decoding and encoding

use crate::error::{BgRemovalError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};

/// A decoded input image and the container format it arrived in
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    /// `None` when the format could not be identified from the bytes
    pub format: Option<ImageFormat>,
}

fn decode_error(detail: impl std::fmt::Display) -> BgRemovalError {
    BgRemovalError::invalid_input(format!("Failed to decode image: {detail}"))
}

/// Decode a base64 payload into raw bytes
///
/// Accepts `data:<mime>;base64,` prefixes, the URL-safe alphabet, missing
/// padding and surrounding whitespace.
///
/// # Errors
/// - Payload is not valid base64 after normalization
///
/// # Examples
///
/// ```rust
/// use imagenerd_bgremove::services::payload::decode_base64;
///
/// assert_eq!(decode_base64("aGk").unwrap(), b"hi");
/// assert_eq!(decode_base64("data:text/plain;base64,aGk=").unwrap(), b"hi");
/// ```
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let body = match payload.trim_start().strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| decode_error("data URL has no payload"))?,
        None => payload,
    };

    let mut normalized: String = body
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string();

    let remainder = normalized.len() % 4;
    if remainder != 0 {
        normalized.extend(std::iter::repeat('=').take(4 - remainder));
    }

    STANDARD.decode(normalized.as_bytes()).map_err(decode_error)
}

/// Decode a base64 image payload, capping its longest side at `max_dimension`
///
/// Oversized images are downscaled with Lanczos3 keeping the aspect ratio.
/// Images are never upscaled.
///
/// # Errors
/// - Invalid base64
/// - Bytes that do not decode as a supported image
pub fn decode_image(payload: &str, max_dimension: Option<u32>) -> Result<DecodedImage> {
    let bytes = decode_base64(payload)?;
    if bytes.is_empty() {
        return Err(decode_error("payload is empty"));
    }

    let format = image::guess_format(&bytes).ok();
    let image = match format {
        Some(format) => image::load_from_memory_with_format(&bytes, format),
        None => image::load_from_memory(&bytes),
    }
    .map_err(decode_error)?;

    log::debug!(
        "Decoded {}x{} {:?} image ({} bytes)",
        image.width(),
        image.height(),
        format,
        bytes.len()
    );

    let image = match max_dimension {
        Some(limit) => cap_dimensions(image, limit),
        None => image,
    };

    Ok(DecodedImage { image, format })
}

/// Downscale so that neither side exceeds `limit`
#[must_use]
pub fn cap_dimensions(image: DynamicImage, limit: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if limit == 0 || (width <= limit && height <= limit) {
        return image;
    }

    let scale = f64::from(limit) / f64::from(width.max(height));
    let new_width = ((f64::from(width) * scale).round() as u32).clamp(1, limit);
    let new_height = ((f64::from(height) * scale).round() as u32).clamp(1, limit);

    log::info!("Downscaling {width}x{height} input to {new_width}x{new_height}");
    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Encode bytes as standard padded base64
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
