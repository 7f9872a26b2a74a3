//! Output format handling service
//!
//! Keeps encoder selection and settings out of the request handling code.

use crate::{
    config::{OutputFormat, RemovalConfig},
    error::{BgRemovalError, Result},
};
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilterType, PngEncoder},
    },
    DynamicImage, ImageEncoder,
};

/// Service for encoding processed images
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encode an image in the requested format
    ///
    /// PNG keeps an alpha channel when the image has one; JPEG drops it.
    ///
    /// # Errors
    /// - Encoder failures
    ///
    /// # Examples
    /// ```rust
    /// use imagenerd_bgremove::{services::OutputFormatHandler, OutputFormat, RemovalConfig};
    /// use image::{DynamicImage, RgbaImage};
    ///
    /// let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
    /// let bytes = OutputFormatHandler::encode(&image, OutputFormat::Png, &RemovalConfig::default())?;
    /// assert_eq!(&bytes[1..4], b"PNG");
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encode(
        image: &DynamicImage,
        format: OutputFormat,
        config: &RemovalConfig,
    ) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        match format {
            OutputFormat::Png => {
                let encoder = PngEncoder::new_with_quality(
                    &mut buffer,
                    Self::png_compression_type(config.png_compression),
                    PngFilterType::Adaptive,
                );
                let written = if image.color().has_alpha() {
                    let rgba_image = image.to_rgba8();
                    encoder.write_image(
                        rgba_image.as_raw(),
                        rgba_image.width(),
                        rgba_image.height(),
                        image::ExtendedColorType::Rgba8,
                    )
                } else {
                    let rgb_image = image.to_rgb8();
                    encoder.write_image(
                        rgb_image.as_raw(),
                        rgb_image.width(),
                        rgb_image.height(),
                        image::ExtendedColorType::Rgb8,
                    )
                };
                written
                    .map_err(|e| BgRemovalError::processing(format!("Failed to encode PNG: {e}")))?;
            },
            OutputFormat::Jpeg => {
                let rgb_image = image.to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut buffer, config.jpeg_quality);
                encoder.encode_image(&rgb_image).map_err(|e| {
                    BgRemovalError::processing(format!("Failed to encode JPEG: {e}"))
                })?;
            },
        }

        log::debug!("Encoded {} output ({} bytes)", format, buffer.len());
        Ok(buffer)
    }

    /// Map a 0-9 compression level onto the PNG encoder's presets
    #[must_use]
    pub fn png_compression_type(level: u8) -> CompressionType {
        match level {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }

    /// Check if a format supports transparency (alpha channel)
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png => true,
            OutputFormat::Jpeg => false,
        }
    }
}
