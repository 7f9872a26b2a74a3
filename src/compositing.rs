//! Background replacement
//!
//! Places a cutout produced by the processor over a solid color or an image.

use crate::error::{BgRemovalError, Result};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage, RgbaImage};

/// New background for a cutout
#[derive(Debug, Clone)]
pub enum Background {
    /// Opaque solid color
    Solid(Rgb<u8>),
    /// Image stretched to the cutout size
    Image(DynamicImage),
}

/// Parse an `"R,G,B"` color with each component in 0-255
///
/// Whitespace around components is ignored.
///
/// # Errors
/// - Anything other than exactly three integers in 0-255
///
/// # Examples
///
/// ```rust
/// use imagenerd_bgremove::compositing::parse_solid_color;
///
/// assert_eq!(parse_solid_color(" 255, 0 ,10").unwrap().0, [255, 0, 10]);
/// assert!(parse_solid_color("256,0,0").is_err());
/// ```
pub fn parse_solid_color(value: &str) -> Result<Rgb<u8>> {
    let invalid = || {
        BgRemovalError::invalid_input(format!(
            "Invalid solid_color '{value}': expected \"R,G,B\" with values 0-255"
        ))
    };

    let components = value
        .split(',')
        .map(|part| part.trim().parse::<u8>().map_err(|_| invalid()))
        .collect::<Result<Vec<u8>>>()?;

    match components.as_slice() {
        [r, g, b] => Ok(Rgb([*r, *g, *b])),
        _ => Err(invalid()),
    }
}

/// Composite `foreground` over `background` and drop the alpha channel
///
/// The result has the foreground's dimensions.
#[must_use]
pub fn composite(foreground: &RgbaImage, background: &Background) -> RgbImage {
    let (width, height) = foreground.dimensions();

    let mut canvas = match background {
        Background::Solid(color) => {
            RgbaImage::from_pixel(width, height, image::Rgba([color[0], color[1], color[2], 255]))
        },
        Background::Image(image) => {
            let rgba = image.to_rgba8();
            if rgba.dimensions() == (width, height) {
                rgba
            } else {
                image::imageops::resize(&rgba, width, height, FilterType::Lanczos3)
            }
        },
    };

    image::imageops::overlay(&mut canvas, foreground, 0, 0);

    DynamicImage::ImageRgba8(canvas).to_rgb8()
}
