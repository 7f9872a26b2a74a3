//! Configuration types for background removal operations

use crate::error::BgRemovalError;
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};

/// Inference backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime (native, supports GPU execution providers)
    #[default]
    Onnx,
    /// Tract (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{other}' (expected onnx or tract)"
            ))),
        }
    }
}

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"
            ))),
        }
    }
}

/// Encoded output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG (no transparency)
    Jpeg,
}

impl OutputFormat {
    /// Format tag used in response envelopes
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How composited (background-replaced) images are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompositeOutput {
    /// Always JPEG
    #[default]
    Jpeg,
    /// JPEG when the input was JPEG, PNG otherwise
    MatchInput,
}

impl CompositeOutput {
    /// Resolve the output format for a composite given the decoded input format
    #[must_use]
    pub fn resolve(self, input: Option<image::ImageFormat>) -> OutputFormat {
        match self {
            Self::Jpeg => OutputFormat::Jpeg,
            Self::MatchInput => match input {
                Some(image::ImageFormat::Jpeg) => OutputFormat::Jpeg,
                _ => OutputFormat::Png,
            },
        }
    }
}

/// Configuration for background removal operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Inference backend
    pub backend: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Model specification including source and preprocessing preset
    pub model_spec: ModelSpec,

    /// Longest side allowed for decoded inputs; larger images are downscaled
    pub max_dimension: Option<u32>,

    /// JPEG quality (0-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// PNG compression level (0-9)
    pub png_compression: u8,

    /// Encoding policy for composited output
    pub composite_output: CompositeOutput,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            model_spec: ModelSpec::default(),
            max_dimension: Some(2048),
            jpeg_quality: 85,
            png_compression: 6,
            composite_output: CompositeOutput::default(),
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use imagenerd_bgremove::{CompositeOutput, ExecutionProvider, RemovalConfig};
    ///
    /// let config = RemovalConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .max_dimension(None)
    ///     .jpeg_quality(95)
    ///     .composite_output(CompositeOutput::MatchInput)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.jpeg_quality, 95);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - JPEG quality: 0-100 (inclusive)
    /// - PNG compression: 0-9 (inclusive)
    /// - Max dimension: at least 1 when set
    ///
    /// # Errors
    /// - Any value outside the ranges above
    ///
    /// # Examples
    ///
    /// ```rust
    /// use imagenerd_bgremove::RemovalConfig;
    ///
    /// let mut config = RemovalConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.png_compression = 12;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> crate::Result<()> {
        if self.jpeg_quality > 100 {
            return Err(BgRemovalError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
                Some(85),
            ));
        }

        if self.png_compression > 9 {
            return Err(BgRemovalError::config_value_error(
                "PNG compression",
                self.png_compression,
                "0-9",
                Some(6),
            ));
        }

        if self.max_dimension == Some(0) {
            return Err(BgRemovalError::config_value_error(
                "max dimension",
                0,
                "1 or greater",
                Some(2048),
            ));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    /// Set inference backend
    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set number of inter-op threads
    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both intra and inter threads
    ///
    /// Intra-op threads get `threads`, inter-op threads get `threads / 2`
    /// (minimum 1). Zero leaves both on auto-detect.
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Set the model specification
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Set the input dimension cap (`None` disables downscaling)
    #[must_use]
    pub fn max_dimension(mut self, max_dimension: Option<u32>) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    /// Set JPEG quality
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    /// Set PNG compression level
    #[must_use]
    pub fn png_compression(mut self, level: u8) -> Self {
        self.config.png_compression = level.min(9);
        self
    }

    /// Set the encoding policy for composited output
    #[must_use]
    pub fn composite_output(mut self, policy: CompositeOutput) -> Self {
        self.config.composite_output = policy;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - A zero max dimension
    pub fn build(self) -> crate::Result<RemovalConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
