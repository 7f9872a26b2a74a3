//! Model downloading
//!
//! Streams ONNX model files into the cache with progress reporting,
//! SHA256 hashing and an atomic rename into place.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use crate::models::{known_model_ids, KnownModel, ModelSource, ModelSpec};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

#[cfg_attr(not(feature = "cli"), allow(unused_variables))]
impl ProgressIndicator {
    /// Set message for progress indicator
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    /// Set length for progress indicator
    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    /// Set position for progress indicator
    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    /// Finish progress indicator with message
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

impl ModelDownloader {
    /// Create a downloader targeting the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to determine the cache directory
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader targeting a specific cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model file into the cache and return its model id
    ///
    /// Already-cached models are not downloaded again.
    ///
    /// # Errors
    /// - Invalid URL
    /// - Network errors or a non-success HTTP status
    /// - File system errors while writing or persisting the file
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);
        log::info!("Downloading model from: {url}");
        log::info!("Model ID: {model_id}");

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {model_id}");
            return Ok(model_id);
        }

        self.cache.ensure_dir()?;

        let progress = if show_progress {
            Some(Self::create_progress_indicator())
        } else {
            None
        };
        if let Some(pb) = &progress {
            pb.set_message(format!("Downloading {model_id}"));
        }

        let final_path = self.cache.get_model_path(&model_id);
        match self.download_file(url, &final_path, progress.as_ref()).await {
            Ok(digest) => {
                if let Some(pb) = progress {
                    pb.finish_with_message(format!("✅ Downloaded {model_id}"));
                }
                log::info!("Successfully downloaded model: {model_id} (sha256 {digest})");
                Ok(model_id)
            },
            Err(e) => {
                if let Some(pb) = progress {
                    pb.finish_with_message("❌ Download failed".to_string());
                }
                Err(e)
            },
        }
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream `url` into a temp file next to `final_path`, then rename it
    /// into place. Returns the hex SHA256 of the body.
    async fn download_file(
        &self,
        url: &str,
        final_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<String> {
        log::debug!("Downloading: {} -> {}", url, final_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {url}"),
                format!("HTTP status {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let dir = final_path.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| BgRemovalError::file_io_error("create temporary download file", dir, &e))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|e| BgRemovalError::file_io_error("open temporary download file", temp.path(), &e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", temp.path(), &e))?;

            downloaded += bytes_read as u64;

            if let Some(pb) = progress {
                if total_size.is_some() {
                    pb.set_position(downloaded);
                } else {
                    pb.set_message(format!(
                        "Downloaded {:.1} MB",
                        downloaded as f64 / 1_048_576.0
                    ));
                }
            }
        }

        if downloaded == 0 {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {url}"),
                "empty response body",
            ));
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", temp.path(), &e))?;
        file.sync_all()
            .await
            .map_err(|e| BgRemovalError::file_io_error("sync file", temp.path(), &e))?;
        drop(file);

        temp.persist(final_path).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model to cache", final_path, &e.error)
        })?;

        log::debug!("Downloaded {} bytes to {}", downloaded, final_path.display());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Verify a file against an expected hex SHA256
    ///
    /// Without an expected hash the check passes.
    ///
    /// # Errors
    /// - Failed to read the file
    pub fn verify_file_integrity(&self, file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        let contents = fs::read(file_path).map_err(|e| {
            BgRemovalError::file_io_error("read file for verification", file_path, &e)
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let actual_hash = format!("{:x}", hasher.finalize());

        if actual_hash.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                file_path.display(),
                expected,
                actual_hash
            );
            Ok(false)
        }
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Validate that a URL can be downloaded from
///
/// # Errors
/// - Not an http(s) URL
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("URL cannot be empty"));
    }

    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL '{url}': only http(s) URLs can be downloaded"
        )));
    }

    Ok(())
}

/// Make sure the model named by `spec` is present on disk and return its path
///
/// Registry models missing from the cache are downloaded.
///
/// # Errors
/// - External model file missing
/// - Unknown model id that is not cached
/// - Download failures
pub async fn ensure_model_available(spec: &ModelSpec, show_progress: bool) -> Result<PathBuf> {
    ensure_model_available_in(&ModelCache::new()?, spec, show_progress).await
}

/// [`ensure_model_available`] against an explicit cache
///
/// # Errors
/// - External model file missing
/// - Unknown model id that is not cached
/// - Download failures
pub async fn ensure_model_available_in(
    cache: &ModelCache,
    spec: &ModelSpec,
    show_progress: bool,
) -> Result<PathBuf> {
    match &spec.source {
        ModelSource::External(path) => {
            if path.is_file() {
                Ok(path.clone())
            } else {
                Err(BgRemovalError::model(format!(
                    "Model file not found: {}",
                    path.display()
                )))
            }
        },
        ModelSource::Downloaded(model_id) => {
            if cache.is_model_cached(model_id) {
                log::debug!("Using cached model {model_id}");
                return Ok(cache.get_model_path(model_id));
            }

            let known = KnownModel::find(model_id).ok_or_else(|| {
                BgRemovalError::model(format!(
                    "Model '{model_id}' is not cached and is not a known model. Known models: {}",
                    known_model_ids().join(", ")
                ))
            })?;

            log::info!("Model {} not cached, downloading", known.id);
            let downloader = ModelDownloader::with_cache(cache.clone())?;
            let downloaded_id = downloader.download_model(known.url, show_progress).await?;
            Ok(cache.get_model_path(&downloaded_id))
        },
    }
}
