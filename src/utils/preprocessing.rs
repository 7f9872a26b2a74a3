//! Image to tensor preprocessing for segmentation models

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

/// Lower bound for the brightness divisor, keeps all-black inputs finite
const MIN_PEAK: f32 = 1e-6;

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image into a normalized NCHW tensor
    ///
    /// This function handles:
    /// - RGB conversion
    /// - Stretch resize to the model input size (aspect ratio is not kept)
    /// - Scaling by the brightest channel value in the resized image
    /// - Per-channel mean/std normalization
    ///
    /// # Errors
    /// - Zero-sized target in the preprocessing configuration
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let [target_height, target_width] = preprocessing_config.target_size;
        if target_height == 0 || target_width == 0 {
            return Err(BgRemovalError::processing(format!(
                "Invalid model input size {target_width}x{target_height}"
            )));
        }

        let rgb_image = image.to_rgb8();
        let resized = image::imageops::resize(
            &rgb_image,
            target_width,
            target_height,
            FilterType::Lanczos3,
        );

        Ok(Self::canvas_to_tensor(&resized, preprocessing_config))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, preprocessing_config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        let peak = canvas
            .as_raw()
            .iter()
            .copied()
            .max()
            .map_or(0.0, f32::from)
            .max(MIN_PEAK);

        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                let value = f32::from(pixel[channel]) / peak;
                tensor[[0, channel, y as usize, x as usize]] =
                    (value - mean[channel]) / std[channel];
            }
        }

        tensor
    }
}
