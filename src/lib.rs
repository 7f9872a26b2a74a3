#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! # ImageNerd Background Service
//!
//! Background removal and replacement for the ImageNerd image editor, with
//! ONNX Runtime and Tract inference backends.
//!
//! Requests carry base64 image payloads. The service decodes them, runs a
//! salient-object segmentation model, composites the cutout onto a solid
//! color or another image, and returns base64 PNG or JPEG.
//!
//! ## Features
//!
//! - **Segmentation Models**: u2net family and ISNet, downloaded and cached on first use
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration) and Tract (pure Rust)
//! - **Forgiving Payloads**: data URLs, URL-safe alphabet and missing padding are accepted
//! - **Entry Points**: JSON over stdin, one-shot CLI, HTTP API and a static frontend server
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imagenerd_bgremove::{
//!     download::ensure_model_available,
//!     services::{BackgroundSource, ImageService},
//!     RemovalConfig,
//! };
//!
//! # async fn example(photo_base64: String) -> anyhow::Result<()> {
//! let config = RemovalConfig::default();
//! ensure_model_available(&config.model_spec, true).await?;
//!
//! let service = ImageService::new(config)?;
//! let cutout = service.remove_background(&photo_base64)?;
//! assert_eq!(cutout.format.as_str(), "png");
//!
//! let on_red = service.change_background(
//!     &photo_base64,
//!     &BackgroundSource::Solid("255,0,0".to_string()),
//! )?;
//! println!("{}", on_red.image_base64);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `server` (default): axum HTTP API and static file server
//! - `cli` (default): the `imagenerd-bg` binary, progress bars and tracing setup
//! - `webp-support` (default): WebP input decoding

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositing;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use compositing::{composite, parse_solid_color, Background};
pub use config::{BackendType, CompositeOutput, ExecutionProvider, OutputFormat, RemovalConfig};
pub use download::{ensure_model_available, validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use models::{KnownModel, ModelManager, ModelSource, ModelSpec};
pub use processor::{BackendFactory, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use services::{
    BackgroundSource, EncodedImage, ImageRequest, ImageResponse, ImageService,
    OutputFormatHandler,
};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
