//! Model cache management for downloaded models
//!
//! Cached models are single ONNX files named `<model_id>.onnx` inside an
//! XDG-compliant cache directory.

use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "IMAGENERD_CACHE_DIR";

const MODEL_EXTENSION: &str = "onnx";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (file stem)
    pub model_id: String,
    /// Path to the cached model file
    pub path: PathBuf,
    /// Size of the model file in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a model cache at the default location
    ///
    /// - `$IMAGENERD_CACHE_DIR/models` when the variable is set
    /// - Linux: `~/.cache/imagenerd-bgremove/models/`
    /// - macOS: `~/Library/Caches/imagenerd-bgremove/models/`
    /// - Windows: `%LOCALAPPDATA%/imagenerd-bgremove/models/`
    ///
    /// The directory is created on first download, not here.
    ///
    /// # Errors
    /// - Failed to determine user cache directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            cache_dir: Self::get_cache_dir()?,
        })
    }

    /// Create a model cache rooted at an explicit models directory
    #[must_use]
    pub fn with_dir<P: AsRef<Path>>(models_dir: P) -> Self {
        Self {
            cache_dir: models_dir.as_ref().to_path_buf(),
        }
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            if !cache_override.trim().is_empty() {
                return Ok(PathBuf::from(cache_override).join("models"));
            }
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("imagenerd-bgremove")
            .join("models"))
    }

    /// Create the cache directory if it does not exist
    ///
    /// # Errors
    /// - Insufficient permissions to create the directory
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &self.cache_dir, &e)
            })?;
        }
        Ok(())
    }

    /// Generate a model ID from a download URL
    ///
    /// The file stem of the URL path is used when present, so release URLs
    /// map onto registry ids. Other URLs get a short hash-based id.
    ///
    /// # Examples
    /// ```
    /// use imagenerd_bgremove::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id(
    ///     "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2netp.onnx",
    /// );
    /// assert_eq!(id, "u2netp");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let after_scheme = without_query
            .split_once("://")
            .map_or(without_query, |(_, rest)| rest)
            .trim_end_matches('/');

        let stem = after_scheme
            .split_once('/')
            .and_then(|(_, path)| path.rsplit('/').next())
            .and_then(|name| Path::new(name).file_stem())
            .and_then(|stem| stem.to_str())
            .filter(|stem| {
                !stem.is_empty()
                    && stem
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            });

        if let Some(stem) = stem {
            return stem.to_string();
        }

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash_string = format!("url-{:x}", hasher.finalize());
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Check whether a model file is cached
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        self.get_model_path(model_id).is_file()
    }

    /// Path of a cached model file (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{model_id}.{MODEL_EXTENSION}"))
    }

    /// Scan the cache directory for model files
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !Self::is_model_file(&path) {
                continue;
            }
            let Some(model_id) = path.file_stem().and_then(|s| s.to_str()) else {
                log::debug!("Skipping non UTF-8 cache entry: {}", path.display());
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                path: path.clone(),
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    fn is_model_file(path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
    }

    /// Remove every cached model file
    ///
    /// Returns the ids of removed models.
    ///
    /// # Errors
    /// - Failed to read the cache directory or remove a file
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed_models = Vec::new();
        for model in self.scan_cached_models()? {
            log::info!("Removing cached model: {}", model.model_id);
            fs::remove_file(&model.path).map_err(|e| {
                BgRemovalError::file_io_error("remove cached model", &model.path, &e)
            })?;
            removed_models.push(model.model_id);
        }
        Ok(removed_models)
    }

    /// Remove one cached model
    ///
    /// Returns `true` if the model was cached and has been removed.
    ///
    /// # Errors
    /// - Failed to remove the model file
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);

        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {model_id}");
        fs::remove_file(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove specific cached model", &model_path, &e)
        })?;

        Ok(true)
    }

    /// Get the current cache directory path
    #[must_use]
    pub fn get_current_cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
