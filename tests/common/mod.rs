//! Shared fixtures for integration tests
//!
//! The stub backend marks the left half of the frame as foreground, so tests
//! can check both the kept subject and the replaced background without a
//! model file.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imagenerd_bgremove::{
    models::{ModelInfo, ModelManager, PreprocessingConfig},
    BackendFactory, BackendType, BgRemovalError, ImageService, InferenceBackend, RemovalConfig,
    Result,
};
use ndarray::Array4;
use std::io::Cursor;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

pub const STUB_INPUT_SIZE: usize = 16;

/// Subject color used by the fixture images
pub const SUBJECT: Rgb<u8> = Rgb([40, 90, 160]);

pub struct StubBackend {
    initialized: bool,
    fail_inference: bool,
    inferences: Arc<AtomicUsize>,
    panics: Arc<AtomicUsize>,
}

impl InferenceBackend for StubBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.inferences.fetch_add(1, Ordering::SeqCst);
        if self
            .panics
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("stub backend panic");
        }
        if self.fail_inference {
            return Err(BgRemovalError::inference("stub inference failure"));
        }
        let (batch, _, height, width) = input.dim();
        Ok(Array4::from_shape_fn((batch, 1, height, width), |(_, _, _, x)| {
            if x < width / 2 {
                1.0
            } else {
                0.0
            }
        }))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, STUB_INPUT_SIZE, STUB_INPUT_SIZE)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, STUB_INPUT_SIZE, STUB_INPUT_SIZE)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: [STUB_INPUT_SIZE as u32, STUB_INPUT_SIZE as u32],
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        })
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "stub".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 0,
            input_shape: self.input_shape(),
            output_shape: self.output_shape(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory counting how many backends and inferences were requested
#[derive(Default, Clone)]
pub struct StubFactory {
    pub fail_inference: bool,
    pub created: Arc<AtomicUsize>,
    pub inferences: Arc<AtomicUsize>,
    /// Inferences left that panic instead of returning
    pub panics: Arc<AtomicUsize>,
}

impl StubFactory {
    pub fn failing() -> Self {
        Self {
            fail_inference: true,
            ..Self::default()
        }
    }

    pub fn panicking_once() -> Self {
        Self {
            panics: Arc::new(AtomicUsize::new(1)),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn inferences(&self) -> usize {
        self.inferences.load(Ordering::SeqCst)
    }
}

impl BackendFactory for StubFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubBackend {
            initialized: false,
            fail_inference: self.fail_inference,
            inferences: Arc::clone(&self.inferences),
            panics: Arc::clone(&self.panics),
        }))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

pub fn stub_service(config: RemovalConfig, factory: &StubFactory) -> ImageService {
    ImageService::with_factory(config, Box::new(factory.clone())).unwrap()
}

pub fn image_base64(width: u32, height: u32, color: Rgb<u8>, format: ImageFormat) -> String {
    let image = RgbImage::from_pixel(width, height, color);
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    STANDARD.encode(buffer.into_inner())
}

pub fn png_base64(width: u32, height: u32) -> String {
    image_base64(width, height, SUBJECT, ImageFormat::Png)
}

pub fn jpeg_base64(width: u32, height: u32) -> String {
    image_base64(width, height, SUBJECT, ImageFormat::Jpeg)
}

/// Decode response base64 and check the bytes really are `expected`
pub fn decode_output(payload: &str, expected: ImageFormat) -> DynamicImage {
    let bytes = STANDARD.decode(payload).unwrap();
    assert_eq!(image::guess_format(&bytes).unwrap(), expected);
    image::load_from_memory_with_format(&bytes, expected).unwrap()
}

pub fn assert_close(actual: Rgb<u8>, expected: Rgb<u8>, tolerance: u8) {
    for (a, e) in actual.0.iter().zip(expected.0.iter()) {
        assert!(
            a.abs_diff(*e) <= tolerance,
            "pixel {actual:?} not within {tolerance} of {expected:?}"
        );
    }
}
