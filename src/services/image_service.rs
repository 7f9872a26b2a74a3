//! Background removal and replacement operations
//!
//! `ImageService` is the single entry point shared by the stdin mode, the
//! one-shot CLI and the HTTP handlers. It takes base64 payloads in and hands
//! base64 payloads out.

use crate::{
    compositing::{composite, parse_solid_color, Background},
    config::{OutputFormat, RemovalConfig},
    error::{BgRemovalError, Result},
    processor::{BackendFactory, BackgroundRemovalProcessor, DefaultBackendFactory},
    services::{
        format::OutputFormatHandler,
        payload::{decode_image, encode_base64},
    },
    types::RemovalResult,
};
use image::DynamicImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};
use tracing::instrument;

/// Operations accepted by [`ImageService::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    RemoveBackground,
    ChangeBackground,
}

impl std::str::FromStr for Operation {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "remove_background" => Ok(Self::RemoveBackground),
            "change_background" => Ok(Self::ChangeBackground),
            _ => Err(BgRemovalError::invalid_input("Unknown operation")),
        }
    }
}

/// JSON request body
///
/// `operation` is only read by [`ImageService::handle`]; the HTTP routes
/// imply it from the path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_background_image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solid_color: Option<String>,
    /// Skip compositing and return the cutout
    #[serde(default)]
    pub transparent: bool,
}

impl ImageRequest {
    /// The input image payload, rejecting absent or blank values
    ///
    /// # Errors
    /// - `image_base64` missing or empty
    pub fn require_image(&self) -> Result<&str> {
        non_blank(self.image_base64.as_deref())
            .ok_or_else(|| BgRemovalError::missing_parameter("image_base64"))
    }

    /// Background selection from the optional fields
    ///
    /// # Errors
    /// - No background given and `transparent` not set
    pub fn background(&self) -> Result<BackgroundSource> {
        BackgroundSource::from_fields(
            self.new_background_image_base64.as_deref(),
            self.solid_color.as_deref(),
            self.transparent,
        )
    }

    /// Check a request carrying `operation` without touching the model
    ///
    /// # Errors
    /// - Unknown or missing operation
    /// - Missing image, or missing background for a change
    pub fn validate(&self) -> Result<Operation> {
        let operation: Operation = self.operation.as_deref().unwrap_or_default().parse()?;
        self.require_image()?;
        if operation == Operation::ChangeBackground {
            self.background()?;
        }
        Ok(operation)
    }
}

/// JSON response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageResponse {
    #[must_use]
    pub fn success(encoded: EncodedImage) -> Self {
        Self {
            success: true,
            image_base64: Some(encoded.image_base64),
            format: Some(encoded.format),
            error: None,
        }
    }

    #[must_use]
    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            image_base64: None,
            format: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<EncodedImage>> for ImageResponse {
    fn from(result: Result<EncodedImage>) -> Self {
        match result {
            Ok(encoded) => Self::success(encoded),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Encoded output image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub image_base64: String,
    pub format: OutputFormat,
}

/// Where the replacement background comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundSource {
    /// Base64 encoded background image
    Image(String),
    /// `"R,G,B"` color, validated when the request is processed
    Solid(String),
    /// No replacement, return the cutout
    Transparent,
}

impl BackgroundSource {
    /// Pick the background from request fields
    ///
    /// `transparent` wins, then a background image, then `solid_color`.
    /// Empty strings count as absent.
    ///
    /// # Errors
    /// - None of the three given
    pub fn from_fields(
        new_background_image_base64: Option<&str>,
        solid_color: Option<&str>,
        transparent: bool,
    ) -> Result<Self> {
        if transparent {
            return Ok(Self::Transparent);
        }
        if let Some(image) = non_blank(new_background_image_base64) {
            return Ok(Self::Image(image.to_string()));
        }
        if let Some(color) = non_blank(solid_color) {
            return Ok(Self::Solid(color.to_string()));
        }
        Err(BgRemovalError::invalid_input(
            "Either new_background_image_base64 or solid_color must be provided",
        ))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Background removal service with a lazily loaded model
pub struct ImageService {
    processor: Mutex<BackgroundRemovalProcessor>,
    config: RemovalConfig,
    model_loaded: AtomicBool,
}

impl ImageService {
    /// Create a service using the backends compiled into this build
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a service with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(config: RemovalConfig, factory: Box<dyn BackendFactory>) -> Result<Self> {
        let processor = BackgroundRemovalProcessor::with_factory(config.clone(), factory)?;
        Ok(Self {
            processor: Mutex::new(processor),
            config,
            model_loaded: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Whether the inference session exists
    ///
    /// Does not wait for a request that is currently holding the processor.
    #[must_use]
    pub fn model_loaded(&self) -> bool {
        self.model_loaded.load(Ordering::Acquire)
    }

    /// Load the model now instead of on the first request
    ///
    /// # Errors
    /// - Model loading or backend initialization failures
    pub fn warm_up(&self) -> Result<()> {
        let mut processor = self.lock_processor();
        processor.initialize()?;
        self.model_loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Lock the processor, discarding a backend left behind by a panic
    fn lock_processor(&self) -> MutexGuard<'_, BackgroundRemovalProcessor> {
        self.processor.lock().unwrap_or_else(|poisoned| {
            warn!("Previous request panicked while holding the processor");
            let mut guard = poisoned.into_inner();
            guard.reset();
            self.model_loaded.store(false, Ordering::Release);
            self.processor.clear_poison();
            guard
        })
    }

    fn run_removal(&self, image: &DynamicImage) -> Result<RemovalResult> {
        let mut processor = self.lock_processor();
        if !processor.is_initialized() {
            info!("Loading segmentation model (first use)");
        }

        let result = processor.process_image(image);
        self.model_loaded
            .store(processor.is_initialized(), Ordering::Release);
        result
    }

    /// Remove the background and return a transparent PNG
    ///
    /// # Errors
    /// - Empty or malformed payload
    /// - Model or inference failures
    #[instrument(skip_all, fields(payload_len = image_base64.len()))]
    pub fn remove_background(&self, image_base64: &str) -> Result<EncodedImage> {
        let image_base64 = non_blank(Some(image_base64))
            .ok_or_else(|| BgRemovalError::missing_parameter("image_base64"))?;

        let decoded = decode_image(image_base64, self.config.max_dimension)?;
        let result = self.run_removal(&decoded.image)?;

        self.encode(&DynamicImage::ImageRgba8(result.image), OutputFormat::Png)
    }

    /// Remove the background and place the subject on `background`
    ///
    /// # Errors
    /// - Empty or malformed payloads
    /// - Invalid solid color
    /// - Model or inference failures
    #[instrument(skip_all, fields(payload_len = image_base64.len()))]
    pub fn change_background(
        &self,
        image_base64: &str,
        background: &BackgroundSource,
    ) -> Result<EncodedImage> {
        let image_base64 = non_blank(Some(image_base64))
            .ok_or_else(|| BgRemovalError::missing_parameter("image_base64"))?;

        // Reject bad backgrounds before paying for inference
        let background = match background {
            BackgroundSource::Transparent => return self.remove_background(image_base64),
            BackgroundSource::Solid(color) => Background::Solid(parse_solid_color(color)?),
            BackgroundSource::Image(payload) => {
                Background::Image(decode_image(payload, self.config.max_dimension)?.image)
            },
        };

        let decoded = decode_image(image_base64, self.config.max_dimension)?;
        let result = self.run_removal(&decoded.image)?;

        let output_format = self.config.composite_output.resolve(decoded.format);
        debug!(
            "Compositing {}x{} cutout, output {}",
            result.image.width(),
            result.image.height(),
            output_format
        );

        let combined = composite(&result.image, &background);
        self.encode(&DynamicImage::ImageRgb8(combined), output_format)
    }

    /// Run a stdin-style request with an `operation` field
    #[must_use]
    pub fn handle(&self, request: &ImageRequest) -> ImageResponse {
        self.dispatch(request).into()
    }

    fn dispatch(&self, request: &ImageRequest) -> Result<EncodedImage> {
        let operation = request.validate()?;
        let image_base64 = request.require_image()?;

        match operation {
            Operation::RemoveBackground => self.remove_background(image_base64),
            Operation::ChangeBackground => {
                self.change_background(image_base64, &request.background()?)
            },
        }
    }

    fn encode(&self, image: &DynamicImage, format: OutputFormat) -> Result<EncodedImage> {
        let bytes = OutputFormatHandler::encode(image, format, &self.config)?;
        Ok(EncodedImage {
            image_base64: encode_base64(&bytes),
            format,
        })
    }
}
