//! Segmentation model registry and model loading

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// External model file on the filesystem
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{model_id}")
            },
        }
    }
}

/// Complete model specification
///
/// `preset` names the [`KnownModel`] whose input size and normalization apply.
/// It is only needed for external files or cached ids that are not in the
/// registry; otherwise it is inferred from the model id or file name.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub preset: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(KnownModel::default_model().id.to_string()),
            preset: None,
        }
    }
}

impl ModelSpec {
    /// Interpret a user-supplied model argument
    ///
    /// Registry ids map to cached models. Anything that looks like a path
    /// (has a separator, an `.onnx` suffix, or exists on disk) is external.
    /// Everything else is treated as a cached model id.
    #[must_use]
    pub fn parse(value: &str, preset: Option<String>) -> Self {
        let trimmed = value.trim();
        let source = if KnownModel::find(trimmed).is_some() {
            ModelSource::Downloaded(trimmed.to_string())
        } else {
            let path = Path::new(trimmed);
            let looks_like_path = trimmed.contains(std::path::MAIN_SEPARATOR)
                || trimmed.contains('/')
                || path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
                || path.exists();
            if looks_like_path {
                ModelSource::External(path.to_path_buf())
            } else {
                ModelSource::Downloaded(trimmed.to_string())
            }
        };
        Self { source, preset }
    }
}

/// Preprocessing parameters for a segmentation model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Model input size as `[height, width]`
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

/// A segmentation model the service knows how to fetch and feed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownModel {
    pub id: &'static str,
    pub url: &'static str,
    /// Square input edge length in pixels
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub description: &'static str,
}

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
const ISNET_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const ISNET_STD: [f32; 3] = [1.0, 1.0, 1.0];

const U2NET: KnownModel = KnownModel {
    id: "u2net",
    url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx",
    input_size: 320,
    mean: IMAGENET_MEAN,
    std: IMAGENET_STD,
    description: "General purpose salient object segmentation",
};

/// Registry of downloadable segmentation models
pub const KNOWN_MODELS: &[KnownModel] = &[
    U2NET,
    KnownModel {
        id: "u2netp",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2netp.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        description: "Lightweight u2net",
    },
    KnownModel {
        id: "u2net_human_seg",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net_human_seg.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        description: "Human segmentation",
    },
    KnownModel {
        id: "silueta",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/silueta.onnx",
        input_size: 320,
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
        description: "u2net reduced to 43MB",
    },
    KnownModel {
        id: "isnet-general-use",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-general-use.onnx",
        input_size: 1024,
        mean: ISNET_MEAN,
        std: ISNET_STD,
        description: "ISNet general use",
    },
    KnownModel {
        id: "isnet-anime",
        url: "https://github.com/danielgatis/rembg/releases/download/v0.0.0/isnet-anime.onnx",
        input_size: 1024,
        mean: ISNET_MEAN,
        std: ISNET_STD,
        description: "ISNet anime character segmentation",
    },
];

impl KnownModel {
    /// Look up a registry entry by id
    #[must_use]
    pub fn find(id: &str) -> Option<&'static KnownModel> {
        KNOWN_MODELS.iter().find(|m| m.id == id)
    }

    /// The model used when nothing else is requested (`u2net`)
    #[must_use]
    pub fn default_model() -> &'static KnownModel {
        &U2NET
    }

    #[must_use]
    pub fn preprocessing_config(&self) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [self.input_size, self.input_size],
            normalization_mean: self.mean,
            normalization_std: self.std,
        }
    }

    /// Resolve the preset for a model, falling back to the default model
    ///
    /// # Errors
    /// - An explicit preset that is not in the registry
    pub fn resolve_preset(preset: Option<&str>, inferred: Option<&str>) -> Result<&'static KnownModel> {
        if let Some(name) = preset {
            return Self::find(name).ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Unknown model preset '{name}'. Known presets: {}",
                    known_model_ids().join(", ")
                ))
            });
        }
        Ok(inferred
            .and_then(Self::find)
            .unwrap_or_else(Self::default_model))
    }
}

/// Ids of all registry models
#[must_use]
pub fn known_model_ids() -> Vec<&'static str> {
    KNOWN_MODELS.iter().map(|m| m.id).collect()
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or inaccessible
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// Get model information
    ///
    /// # Errors
    /// - Model file not found or inaccessible
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Provider cannot determine the model's input contract
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    fn get_model_path(&self) -> Result<PathBuf>;
}

fn read_model_file(path: &Path, operation: &str) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(BgRemovalError::model_error_with_context(
            "load",
            path,
            "file not found",
            &["run `imagenerd-bg download-model`", "check --cache-dir or --model"],
        ));
    }
    fs::read(path).map_err(|e| BgRemovalError::file_io_error(operation, path, &e))
}

fn model_info_for(name: String, size_bytes: usize, preset: &KnownModel) -> ModelInfo {
    let side = preset.input_size as usize;
    ModelInfo {
        name,
        precision: "fp32".to_string(),
        size_bytes,
        input_shape: (1, 3, side, side),
        output_shape: (1, 1, side, side),
    }
}

/// Provider for an ONNX file supplied by path
#[derive(Debug)]
pub struct ExternalModelProvider {
    model_path: PathBuf,
    preset: &'static KnownModel,
}

impl ExternalModelProvider {
    /// Create a provider for an external model file
    ///
    /// Without an explicit preset, the file stem is matched against the
    /// registry (`u2netp.onnx` gets the `u2netp` preset).
    ///
    /// # Errors
    /// - Unknown preset name
    pub fn new<P: AsRef<Path>>(model_path: P, preset: Option<&str>) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        let stem = model_path.file_stem().and_then(|s| s.to_str());
        let preset = KnownModel::resolve_preset(preset, stem)?;
        Ok(Self { model_path, preset })
    }
}

impl ModelProvider for ExternalModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        read_model_file(&self.model_path, "read external model")
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let size = fs::metadata(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("stat external model", &self.model_path, &e))?
            .len() as usize;
        Ok(model_info_for(
            ModelSource::External(self.model_path.clone()).display_name(),
            size,
            self.preset,
        ))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preset.preprocessing_config())
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.model_path.clone())
    }
}

/// Provider for a model stored in the local cache
#[derive(Debug)]
pub struct DownloadedModelProvider {
    model_id: String,
    preset: &'static KnownModel,
    cache: ModelCache,
}

impl DownloadedModelProvider {
    /// Create a provider for a cached model id
    ///
    /// The cache is only consulted when the model is loaded, so this
    /// succeeds for models that have not been downloaded yet.
    ///
    /// # Errors
    /// - Unknown preset name
    pub fn new(model_id: String, preset: Option<&str>, cache: ModelCache) -> Result<Self> {
        let preset = KnownModel::resolve_preset(preset, Some(&model_id))?;
        Ok(Self {
            model_id,
            preset,
            cache,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

impl ModelProvider for DownloadedModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        if !self.cache.is_model_cached(&self.model_id) {
            let available: Vec<String> = self
                .cache
                .scan_cached_models()
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.model_id)
                .collect();
            return Err(BgRemovalError::model(format!(
                "Model '{}' not found in cache {}. Cached models: {:?}",
                self.model_id,
                self.cache.get_current_cache_dir().display(),
                available
            )));
        }
        read_model_file(
            &self.cache.get_model_path(&self.model_id),
            "read cached model file",
        )
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let path = self.cache.get_model_path(&self.model_id);
        let size = fs::metadata(&path)
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        Ok(model_info_for(
            ModelSource::Downloaded(self.model_id.clone()).display_name(),
            size,
            self.preset,
        ))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preset.preprocessing_config())
    }

    fn get_model_path(&self) -> Result<PathBuf> {
        Ok(self.cache.get_model_path(&self.model_id))
    }
}

/// Facade over the provider selected by a [`ModelSpec`]
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Create a model manager using the default cache location
    ///
    /// # Errors
    /// - Cache directory cannot be determined
    /// - Unknown preset name
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        Self::from_spec_with_cache(spec, ModelCache::new()?)
    }

    /// Create a model manager resolving cached ids against `cache`
    ///
    /// # Errors
    /// - Unknown preset name
    pub fn from_spec_with_cache(spec: &ModelSpec, cache: ModelCache) -> Result<Self> {
        let provider: Box<dyn ModelProvider> = match &spec.source {
            ModelSource::External(path) => {
                Box::new(ExternalModelProvider::new(path, spec.preset.as_deref())?)
            },
            ModelSource::Downloaded(model_id) => Box::new(DownloadedModelProvider::new(
                model_id.clone(),
                spec.preset.as_deref(),
                cache,
            )?),
        };
        Ok(Self { provider })
    }

    /// Wrap an arbitrary provider
    #[must_use]
    pub fn with_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// Load model data
    ///
    /// # Errors
    /// - Model file not found or unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Provider cannot determine the model's input contract
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    /// Get the model file path
    ///
    /// # Errors
    /// - Model path not available for this provider type
    pub fn get_model_path(&self) -> Result<PathBuf> {
        self.provider.get_model_path()
    }
}
