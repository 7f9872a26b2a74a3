//! Background removal processor
//!
//! `BackgroundRemovalProcessor` owns the inference backend and runs the
//! preprocess, inference and mask stages for a single image. The stdin entry
//! point, the one-shot CLI and the HTTP server all go through it.

use crate::{
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::ModelManager,
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::ImagePreprocessor,
};
use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, RgbaImage};
use instant::Instant;
use log::{debug, info, warn};
use ndarray::{Array4, Axis};
use tracing::{debug as trace_debug, instrument, span, Level};

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance of the specified type with the given model manager
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Backend types not compiled into this build
    /// - Backend construction failures
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Backend factory for the backends enabled through cargo features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl DefaultBackendFactory {
    #[cfg(feature = "onnx")]
    fn create_onnx(model_manager: ModelManager) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
            model_manager,
        )))
    }

    #[cfg(not(feature = "onnx"))]
    fn create_onnx(_model_manager: ModelManager) -> Result<Box<dyn InferenceBackend>> {
        Err(BgRemovalError::invalid_config(
            "ONNX backend is not available in this build (enable the `onnx` feature)",
        ))
    }

    #[cfg(feature = "tract")]
    fn create_tract(model_manager: ModelManager) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(crate::backends::TractBackend::with_model_manager(
            model_manager,
        )))
    }

    #[cfg(not(feature = "tract"))]
    fn create_tract(_model_manager: ModelManager) -> Result<Box<dyn InferenceBackend>> {
        Err(BgRemovalError::invalid_config(
            "Tract backend is not available in this build (enable the `tract` feature)",
        ))
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            BackendType::Onnx => Self::create_onnx(model_manager),
            BackendType::Tract => Self::create_tract(model_manager),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        [
            (cfg!(feature = "onnx"), BackendType::Onnx),
            (cfg!(feature = "tract"), BackendType::Tract),
        ]
        .into_iter()
        .filter_map(|(enabled, backend)| enabled.then_some(backend))
        .collect()
    }
}

/// Segmentation pipeline around a lazily created inference backend
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
    initialized: bool,
}

impl BackgroundRemovalProcessor {
    /// Create a new processor with the default backend factory
    ///
    /// # Errors
    /// - Invalid removal configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a new processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid removal configuration
    pub fn with_factory(
        config: RemovalConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
            initialized: false,
        })
    }

    /// Create the backend and load the model, if not done yet
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Model loading failures
    /// - Backend initialization errors
    /// - Execution provider setup failures
    pub fn initialize(&mut self) -> Result<()> {
        self.load_backend().map(|_| ())
    }

    /// Drop the backend so the next request creates a fresh session
    pub fn reset(&mut self) {
        if self.backend.take().is_some() {
            warn!("Discarding inference backend, it will be recreated on next use");
        }
        self.initialized = false;
    }

    /// Returns the model load time when this call created the session
    fn load_backend(&mut self) -> Result<Option<u64>> {
        if self.initialized {
            return Ok(None);
        }

        info!("Initializing background removal processor");
        debug!("Model spec: {:?}", self.config.model_spec);
        debug!("Backend type: {}", self.config.backend);
        debug!("Execution provider: {}", self.config.execution_provider);

        let model_manager = ModelManager::from_spec(&self.config.model_spec)?;
        let mut backend = self
            .backend_factory
            .create_backend(self.config.backend, model_manager)?;

        let load_time = backend.initialize(&self.config)?;

        self.backend = Some(backend);
        self.initialized = true;

        info!("Background removal processor initialized successfully");
        Ok(load_time.map(|duration| duration.as_millis() as u64))
    }

    /// Remove the background from a decoded image
    ///
    /// Initializes the backend on first use. The returned cutout keeps the
    /// source RGB values; its alpha is `mask * source_alpha / 255`.
    ///
    /// # Errors
    ///
    /// Returns `BgRemovalError` for:
    /// - Empty images
    /// - Backend initialization failures
    /// - Inference execution errors
    /// - Malformed model output
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend,
            model = %self.config.model_spec.source.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        let original_dimensions = image.dimensions();
        if original_dimensions.0 == 0 || original_dimensions.1 == 0 {
            return Err(BgRemovalError::invalid_input("Image has no pixels"));
        }

        let total_start = Instant::now();
        let mut timings = ProcessingTimings {
            model_load_ms: self.load_backend()?,
            ..ProcessingTimings::default()
        };

        let input_tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                original_width = %original_dimensions.0,
                original_height = %original_dimensions.1
            )
            .entered();
            self.preprocess_image_for_inference(image, &mut timings)?
        };

        let output_tensor = {
            let _span = span!(
                Level::INFO,
                "inference",
                backend = %self.config.backend,
                model = %self.config.model_spec.source.display_name()
            )
            .entered();
            self.perform_inference(&input_tensor, &mut timings)?
        };

        let (mask, cutout) = {
            let _span = span!(
                Level::DEBUG,
                "background_removal",
                width = %original_dimensions.0,
                height = %original_dimensions.1
            )
            .entered();
            let postprocess_start = Instant::now();
            let mask = Self::tensor_to_mask(&output_tensor, original_dimensions)?;
            let cutout = Self::apply_background_removal(image, &mask)?;
            timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;
            (mask, cutout)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        trace_debug!(
            preprocessing_ms = timings.preprocessing_ms,
            inference_ms = timings.inference_ms,
            postprocessing_ms = timings.postprocessing_ms,
            total_ms = timings.total_ms,
            "Background removal complete"
        );

        Ok(RemovalResult::new(cutout, mask, original_dimensions, timings))
    }

    /// Preprocess image for inference with timing
    fn preprocess_image_for_inference(
        &self,
        image: &DynamicImage,
        timings: &mut ProcessingTimings,
    ) -> Result<Array4<f32>> {
        let preprocess_start = Instant::now();

        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| BgRemovalError::processing("Backend not initialized"))?;

        let preprocessing_config = backend.get_preprocessing_config()?;
        let input_tensor =
            ImagePreprocessor::preprocess_for_inference(image, &preprocessing_config)?;

        timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;
        Ok(input_tensor)
    }

    /// Perform inference with timing
    fn perform_inference(
        &mut self,
        input_tensor: &Array4<f32>,
        timings: &mut ProcessingTimings,
    ) -> Result<Array4<f32>> {
        let inference_start = Instant::now();

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::processing("Backend not initialized"))?;

        let output_tensor = backend.infer(input_tensor)?;
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;

        Ok(output_tensor)
    }

    /// Min-max normalise channel 0 of the model output and scale it back to
    /// the source size
    fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (batch, channels, height, width) = tensor.dim();
        if batch == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(BgRemovalError::inference(format!(
                "Model produced an empty output tensor {:?}",
                tensor.dim()
            )));
        }

        let plane = tensor.index_axis(Axis(0), 0);
        let plane = plane.index_axis(Axis(0), 0);

        let (min, max) = plane
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let data: Vec<u8> = if range.is_finite() && range > f32::EPSILON {
            plane
                .iter()
                .map(|&v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
                .collect()
        } else {
            // Flat prediction carries no foreground
            vec![0; height * width]
        };

        let model_mask = GrayImage::from_raw(width as u32, height as u32, data)
            .ok_or_else(|| BgRemovalError::processing("Failed to build mask from model output"))?;

        let (target_width, target_height) = original_dimensions;
        let mask_image = if model_mask.dimensions() == original_dimensions {
            model_mask
        } else {
            image::imageops::resize(
                &model_mask,
                target_width,
                target_height,
                FilterType::Lanczos3,
            )
        };

        Ok(SegmentationMask::from_image(&mask_image))
    }

    /// Apply background removal using the segmentation mask
    fn apply_background_removal(
        image: &DynamicImage,
        mask: &SegmentationMask,
    ) -> Result<RgbaImage> {
        let mut rgba_image = image.to_rgba8();
        if rgba_image.dimensions() != mask.dimensions {
            return Err(BgRemovalError::processing(
                "Image and mask dimensions do not match",
            ));
        }

        for (pixel, &mask_value) in rgba_image.pixels_mut().zip(mask.data.iter()) {
            let alpha = u16::from(mask_value) * u16::from(pixel[3]) / 255;
            pixel[3] = alpha as u8;
        }

        Ok(rgba_image)
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Check if the processor is initialized
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Backends the factory can build
    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackendFactory, MockMask, MockOnnxBackend};
    use image::{Rgba, RgbaImage};

    fn mock_processor(backend: MockOnnxBackend) -> BackgroundRemovalProcessor {
        BackgroundRemovalProcessor::with_factory(
            RemovalConfig::default(),
            Box::new(MockBackendFactory::new(backend)),
        )
        .unwrap()
    }

    fn test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 3) as u8, (y * 5) as u8, 200, 255])
        }))
    }

    #[test]
    fn test_processor_initializes_lazily() {
        let backend = MockOnnxBackend::with_input_size(32);
        let history = backend.call_history_handle();
        let mut processor = mock_processor(backend);

        assert!(!processor.is_initialized());
        let first = processor.process_image(&test_image(40, 30)).unwrap();
        assert!(processor.is_initialized());
        assert!(first.timings.model_load_ms.is_some());

        let second = processor.process_image(&test_image(40, 30)).unwrap();
        assert!(second.timings.model_load_ms.is_none());

        assert_eq!(
            *history.lock().unwrap(),
            vec!["initialize", "infer", "infer"]
        );
    }

    #[test]
    fn test_explicit_initialize_is_idempotent() {
        let backend = MockOnnxBackend::with_input_size(32);
        let history = backend.call_history_handle();
        let mut processor = mock_processor(backend);

        processor.initialize().unwrap();
        processor.initialize().unwrap();
        assert!(processor.is_initialized());
        assert_eq!(*history.lock().unwrap(), vec!["initialize"]);
    }

    #[test]
    fn test_reset_recreates_backend() {
        let factory = MockBackendFactory::new(MockOnnxBackend::with_input_size(32));
        let created = factory.created_handle();
        let mut processor =
            BackgroundRemovalProcessor::with_factory(RemovalConfig::default(), Box::new(factory))
                .unwrap();

        processor.initialize().unwrap();
        processor.reset();
        assert!(!processor.is_initialized());

        let result = processor.process_image(&test_image(8, 8)).unwrap();
        assert!(result.timings.model_load_ms.is_some());
        assert_eq!(created.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_factory_receives_configured_backend() {
        let factory = MockBackendFactory::new(MockOnnxBackend::with_input_size(32));
        let created = factory.created_handle();
        let config = RemovalConfig::builder()
            .backend(BackendType::Tract)
            .build()
            .unwrap();
        let mut processor =
            BackgroundRemovalProcessor::with_factory(config, Box::new(factory)).unwrap();

        processor.initialize().unwrap();
        assert_eq!(*created.lock().unwrap(), vec![BackendType::Tract]);
        assert_eq!(
            processor.available_backends(),
            vec![BackendType::Onnx, BackendType::Tract]
        );
    }

    #[test]
    fn test_cutout_keeps_rgb_and_takes_alpha_from_mask() {
        let mut processor = mock_processor(MockOnnxBackend::with_input_size(32));
        let image = test_image(64, 48);
        let result = processor.process_image(&image).unwrap();

        assert_eq!(result.original_dimensions, (64, 48));
        assert_eq!(result.image.dimensions(), (64, 48));
        assert_eq!(result.mask.dimensions, (64, 48));

        let center = result.image.get_pixel(32, 24);
        assert!(center[3] > 200, "center alpha was {}", center[3]);
        assert_eq!(&center.0[..3], &image.to_rgba8().get_pixel(32, 24).0[..3]);

        let corner = result.image.get_pixel(0, 0);
        assert_eq!(corner[3], 0);
        assert_eq!(&corner.0[..3], &[0, 0, 200]);
    }

    #[test]
    fn test_source_alpha_scales_mask() {
        let mut processor = mock_processor(MockOnnxBackend::with_input_size(32));
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 32, Rgba([9, 9, 9, 128])));
        let result = processor.process_image(&image).unwrap();

        let center_mask = result.mask.data[16 * 32 + 16];
        let center = result.image.get_pixel(16, 16);
        assert_eq!(
            u16::from(center[3]),
            u16::from(center_mask) * 128 / 255
        );
    }

    #[test]
    fn test_flat_model_output_produces_empty_mask() {
        let backend = MockOnnxBackend::with_input_size(32).with_mask(MockMask::Constant(0.7));
        let mut processor = mock_processor(backend);
        let result = processor.process_image(&test_image(20, 20)).unwrap();

        assert!(result.mask.data.iter().all(|&v| v == 0));
        assert!(result.image.pixels().all(|p| p[3] == 0));
        assert_eq!(result.mask.statistics().foreground_pixels, 0);
    }

    #[test]
    fn test_initialization_failure_is_reported() {
        let mut processor = mock_processor(MockOnnxBackend::new_failing_init());
        let err = processor.process_image(&test_image(8, 8)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
        assert!(!processor.is_initialized());
    }

    #[test]
    fn test_inference_failure_is_reported() {
        let mut processor = mock_processor(MockOnnxBackend::new_failing_inference());
        let err = processor.process_image(&test_image(8, 8)).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_empty_image_rejected() {
        let mut processor = mock_processor(MockOnnxBackend::with_input_size(32));
        let err = processor
            .process_image(&DynamicImage::new_rgba8(0, 10))
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RemovalConfig {
            png_compression: 42,
            ..RemovalConfig::default()
        };
        let result = BackgroundRemovalProcessor::with_factory(
            config,
            Box::new(MockBackendFactory::new(MockOnnxBackend::new())),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_tensor_to_mask_normalizes_range() {
        let tensor = Array4::from_shape_vec((1, 1, 1, 3), vec![2.0, 3.0, 4.0]).unwrap();
        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, (3, 1)).unwrap();
        assert_eq!(mask.data, vec![0, 128, 255]);
    }

    #[test]
    fn test_default_factory_lists_compiled_backends() {
        let backends = DefaultBackendFactory.available_backends();
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
    }
}
