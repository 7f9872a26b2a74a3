//! HTTP servers
//!
//! The image API wraps [`ImageService`] behind three JSON routes; the static
//! server hosts the frontend with clean URLs.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod static_files;

pub use self::config::{ServerConfig, ServerProfile};
pub use self::error::{ApiError, ApiResult};
pub use self::routes::{cors_layer, create_router};
pub use self::static_files::{static_router, StaticRoutes, StaticSite};

use crate::{download::ensure_model_available, services::ImageService};
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ImageService>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(service: ImageService, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }
}

/// Run the image API until Ctrl-C
///
/// # Errors
/// - Model download failures
/// - Invalid processing configuration
/// - Bind failures
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!(
        profile = %config.profile,
        model = %config.removal.model_spec.source.display_name(),
        "Starting image API"
    );

    let model_path = ensure_model_available(&config.removal.model_spec, true)
        .await
        .context("Failed to make the segmentation model available")?;
    tracing::info!(path = %model_path.display(), "Model file ready");

    if let Some(increment) = config.profile.nice_increment() {
        lower_priority(increment);
    }

    let service = ImageService::new(config.removal.clone())
        .context("Invalid processing configuration")?;
    let state = AppState::new(service, config.clone());

    if config.profile.eager_model_load() {
        let service = Arc::clone(&state.service);
        let started = instant::Instant::now();
        tokio::task::spawn_blocking(move || service.warm_up())
            .await
            .context("Model warm-up task failed")?
            .context("Failed to load segmentation model")?;
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Segmentation model loaded"
        );
    } else {
        tracing::info!("Model will be loaded on first request");
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    tracing::info!("Image API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Image API stopped");
    Ok(())
}

/// Serve `site` on `host:port` until Ctrl-C
///
/// # Errors
/// - Missing root directory
/// - Bind failures
pub async fn run_static_server(host: &str, port: u16, site: StaticSite) -> anyhow::Result<()> {
    if !site.root().is_dir() {
        anyhow::bail!("Frontend directory not found: {}", site.root().display());
    }

    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {host}:{port}"))?;
    tracing::info!(
        root = %site.root().display(),
        "Static server listening on http://{}",
        listener.local_addr()?
    );
    for (name, file) in site.routes().iter() {
        tracing::debug!("  /{name} -> {file}");
    }

    axum::serve(listener, static_router(site))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Static server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl-C handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn lower_priority(increment: i32) {
    // SAFETY: nice only adjusts the calling process's scheduling priority.
    let result = unsafe { libc::nice(increment) };
    if result == -1 {
        tracing::warn!(
            "Could not lower process priority: {}",
            std::io::Error::last_os_error()
        );
    } else {
        tracing::info!("Process priority lowered to niceness {result}");
    }
}

#[cfg(not(unix))]
fn lower_priority(increment: i32) {
    tracing::debug!("Priority adjustment of {increment} not supported on this platform");
}
