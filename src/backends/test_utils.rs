//! Mock backends for testing inference without model files

use crate::{
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, ModelManager, PreprocessingConfig},
    processor::BackendFactory,
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// What the mock model outputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockMask {
    /// Soft circle centred in the frame
    Circle,
    /// Every value the same (degenerate model output)
    Constant(f32),
}

/// Mock segmentation backend
#[derive(Debug, Clone)]
pub struct MockOnnxBackend {
    initialized: bool,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    mask: MockMask,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockOnnxBackend {
    /// Create a mock backend with a 320x320 input
    #[must_use]
    pub fn new() -> Self {
        Self::with_input_size(320)
    }

    /// Create a mock backend with a square input of `size` pixels
    #[must_use]
    pub fn with_input_size(size: u32) -> Self {
        let side = size as usize;
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock-segmentation-model".to_string(),
                precision: "fp32".to_string(),
                size_bytes: 1024 * 1024,
                input_shape: (1, 3, side, side),
                output_shape: (1, 1, side, side),
            },
            preprocessing_config: PreprocessingConfig {
                target_size: [size, size],
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
            },
            mask: MockMask::Circle,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::with_input_size(32);
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::with_input_size(32);
        backend.should_fail_inference = true;
        backend
    }

    #[must_use]
    pub fn with_mask(mut self, mask: MockMask) -> Self {
        self.mask = mask;
        self
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Shared handle to the call history, usable after the backend is boxed
    pub fn call_history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mock_output(&self, batch_size: usize) -> Array4<f32> {
        let output_height = self.model_info.output_shape.2;
        let output_width = self.model_info.output_shape.3;

        match self.mask {
            MockMask::Constant(value) => {
                Array4::from_elem((batch_size, 1, output_height, output_width), value)
            },
            MockMask::Circle => {
                let center_x = output_width as f32 / 2.0;
                let center_y = output_height as f32 / 2.0;
                let radius = output_width.min(output_height) as f32 / 3.0;

                Array4::from_shape_fn(
                    (batch_size, 1, output_height, output_width),
                    |(_, _, y, x)| {
                        let dx = x as f32 + 0.5 - center_x;
                        let dy = y as f32 + 0.5 - center_y;
                        let distance = (dx * dx + dy * dy).sqrt();
                        if distance < radius {
                            ((radius - distance) / radius).clamp(0.0, 1.0)
                        } else {
                            0.0
                        }
                    },
                )
            },
        }
    }
}

impl Default for MockOnnxBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockOnnxBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(150)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::inference("Mock backend not initialized"));
        }

        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock backend inference failed"));
        }

        let (batch, channels, height, width) = input.dim();
        let expected = self.model_info.input_shape;
        if (channels, height, width) != (expected.1, expected.2, expected.3) {
            return Err(BgRemovalError::inference(format!(
                "Unexpected input shape {:?}, expected {:?}",
                input.dim(),
                expected
            )));
        }

        Ok(self.generate_mock_output(batch))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory handing out clones of a prepared mock backend
#[derive(Debug)]
pub struct MockBackendFactory {
    template: MockOnnxBackend,
    created: Arc<Mutex<Vec<BackendType>>>,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(template: MockOnnxBackend) -> Self {
        Self {
            template,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Backend types requested so far
    pub fn created_handle(&self) -> Arc<Mutex<Vec<BackendType>>> {
        Arc::clone(&self.created)
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        _model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        if let Ok(mut created) = self.created.lock() {
            created.push(backend_type);
        }
        Ok(Box::new(self.template.clone()))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_lifecycle() {
        let mut backend = MockOnnxBackend::with_input_size(16);
        let input = Array4::<f32>::zeros((1, 3, 16, 16));

        assert!(backend.infer(&input).is_err());
        backend.initialize(&RemovalConfig::default()).unwrap();
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, 16, 16));

        assert_eq!(backend.get_call_history(), vec!["infer", "initialize", "infer"]);
    }

    #[test]
    fn test_mock_circle_mask_shape() {
        let mut backend = MockOnnxBackend::with_input_size(30);
        backend.initialize(&RemovalConfig::default()).unwrap();
        let output = backend.infer(&Array4::zeros((1, 3, 30, 30))).unwrap();

        assert!(output[[0, 0, 15, 15]] > 0.8);
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
        assert_eq!(output[[0, 0, 29, 29]], 0.0);
    }

    #[test]
    fn test_mock_failures() {
        let mut backend = MockOnnxBackend::new_failing_init();
        assert!(backend.initialize(&RemovalConfig::default()).is_err());
        assert!(!backend.is_initialized());

        let mut backend = MockOnnxBackend::new_failing_inference();
        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 32, 32))).is_err());
    }

    #[test]
    fn test_mock_rejects_wrong_input_shape() {
        let mut backend = MockOnnxBackend::with_input_size(16);
        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());
    }
}
