//! ImageNerd background service CLI
//!
//! One binary for every entry point: the JSON stdin mode used by the editor
//! backend, one-shot removal and replacement, the HTTP image API, the static
//! frontend server and model cache management.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    config::{BackendType, ExecutionProvider, RemovalConfig},
    download::{ensure_model_available, ModelDownloader},
    models::{known_model_ids, KnownModel, KNOWN_MODELS},
    processor::{BackendFactory, DefaultBackendFactory},
    server::{
        config::{DEFAULT_STATIC_PORT, HOST_ENV, PORT_ENV, PROFILE_ENV},
        run_server, run_static_server, ServerConfig, ServerProfile, StaticRoutes, StaticSite,
    },
    services::{encode_base64, BackgroundSource, ImageRequest, ImageResponse, ImageService},
    tracing_config::init_cli_tracing,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Background removal and replacement for the ImageNerd editor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imagenerd-bg")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH", env = CACHE_DIR_ENV, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Registry model id, cached model id, or path to an ONNX file [default: u2net]
    #[arg(short, long, value_name = "ID|PATH", env = "IMAGENERD_MODEL", global = true)]
    pub model: Option<String>,

    /// Registry model whose input size and normalization apply to --model
    #[arg(long, value_name = "ID", global = true)]
    pub preset: Option<String>,

    /// Inference backend (onnx, tract) [default: onnx]
    #[arg(long, global = true)]
    pub backend: Option<BackendType>,

    /// ONNX Runtime execution provider (auto, cpu, cuda, coreml) [default: auto]
    #[arg(long, global = true)]
    pub provider: Option<ExecutionProvider>,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0, global = true)]
    pub threads: usize,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read one JSON request from stdin and print the response envelope
    Stdin,

    /// Remove the background and print the PNG as base64
    Remove {
        /// Base64 image, @file, or - for stdin
        #[arg(value_name = "IMAGE")]
        input: String,
    },

    /// Replace the background and print the result as base64
    Change(ChangeArgs),

    /// Run the HTTP image API
    Serve(ServeArgs),

    /// Serve the frontend with clean URLs
    Static(StaticArgs),

    /// Download a registry model or a model URL into the cache
    DownloadModel,

    /// List registry models and cached models
    ListModels,

    /// Clear cached models (combine with --model to clear a specific model)
    ClearCache,

    /// Show backend and execution provider diagnostics
    Providers,
}

#[derive(Args, Debug)]
pub struct ChangeArgs {
    /// Base64 image, @file, or - for stdin
    #[arg(value_name = "IMAGE")]
    pub input: String,

    /// Replacement background as base64 or @file
    #[arg(long, value_name = "IMAGE")]
    pub background_image: Option<String>,

    /// Replacement background color
    #[arg(long, value_name = "R,G,B")]
    pub solid_color: Option<String>,

    /// Skip compositing and return the transparent cutout
    #[arg(long)]
    pub remove_only: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on [default: 5001]
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind [default: depends on profile]
    #[arg(long)]
    pub host: Option<String>,

    /// Resource profile (standard, low-resource)
    #[arg(long)]
    pub profile: Option<ServerProfile>,
}

#[derive(Args, Debug)]
pub struct StaticArgs {
    /// Directory holding the frontend files
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_STATIC_PORT)]
    pub port: u16,

    /// Extra clean URL mapping, may be repeated
    #[arg(long = "route", value_name = "NAME=FILE")]
    pub routes: Vec<String>,
}

pub async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if let Some(cache_dir) = &cli.cache_dir {
        std::env::set_var(CACHE_DIR_ENV, cache_dir);
        debug!("Using cache directory {}", cache_dir.display());
    }

    match &cli.command {
        Command::Stdin => run_stdin(&cli).await,
        Command::Remove { input } => run_remove(&cli, input).await,
        Command::Change(args) => run_change(&cli, args).await,
        Command::Serve(args) => run_serve(&cli, args).await,
        Command::Static(args) => run_static(args).await,
        Command::DownloadModel => download_model(&cli).await,
        Command::ListModels => list_models(),
        Command::ClearCache => clear_cache(&cli),
        Command::Providers => {
            show_provider_diagnostics();
            Ok(ExitCode::SUCCESS)
        },
    }
}

/// Fetch the model if needed and build the service
async fn prepare_service(config: RemovalConfig, show_progress: bool) -> Result<Arc<ImageService>> {
    ensure_model_available(&config.model_spec, show_progress)
        .await
        .context("Failed to make the segmentation model available")?;
    let service = ImageService::new(config).context("Invalid processing configuration")?;
    Ok(Arc::new(service))
}

async fn run_stdin(cli: &Cli) -> Result<ExitCode> {
    let (_, code) = answer_stdin(io::stdin().lock(), io::stdout().lock(), || async {
        prepare_service(CliConfigBuilder::stdin(cli)?, false).await
    })
    .await?;
    Ok(code)
}

/// Read one JSON request from `reader` and write one envelope line to `writer`
///
/// `make_service` only runs for a well-formed request, so a bad request never
/// fetches the model.
async fn answer_stdin<R, W, F, Fut>(
    mut reader: R,
    mut writer: W,
    make_service: F,
) -> Result<(ImageResponse, ExitCode)>
where
    R: Read,
    W: Write,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<ImageService>>>,
{
    let mut input = Vec::new();
    reader
        .read_to_end(&mut input)
        .context("Failed to read from stdin")?;

    let response = match serde_json::from_slice::<ImageRequest>(&input) {
        Ok(request) => handle_stdin_request(request, make_service).await,
        Err(e) => ImageResponse::failure(format!("Invalid JSON input: {e}")),
    };

    let envelope = serde_json::to_string(&response).context("Failed to serialize response")?;
    writeln!(writer, "{envelope}").context("Failed to write to stdout")?;
    writer.flush().context("Failed to flush stdout")?;

    let code = if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };
    Ok((response, code))
}

async fn handle_stdin_request<F, Fut>(request: ImageRequest, make_service: F) -> ImageResponse
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<ImageService>>>,
{
    if let Err(e) = request.validate() {
        return ImageResponse::failure(e.to_string());
    }
    let service = match make_service().await {
        Ok(service) => service,
        Err(e) => return ImageResponse::failure(format!("{e:#}")),
    };

    tokio::task::spawn_blocking(move || service.handle(&request))
        .await
        .unwrap_or_else(|e| ImageResponse::failure(format!("Processing task failed: {e}")))
}

async fn run_remove(cli: &Cli, input: &str) -> Result<ExitCode> {
    let image_base64 = read_payload(input)?;
    let service = prepare_service(CliConfigBuilder::one_shot(cli)?, true).await?;

    let encoded = tokio::task::spawn_blocking(move || service.remove_background(&image_base64))
        .await
        .context("Processing task failed")??;

    info!("Produced {} output", encoded.format);
    write_stdout(&encoded.image_base64)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_change(cli: &Cli, args: &ChangeArgs) -> Result<ExitCode> {
    let image_base64 = read_payload(&args.input)?;
    let background_image = args
        .background_image
        .as_deref()
        .map(read_payload)
        .transpose()?;
    let background = BackgroundSource::from_fields(
        background_image.as_deref(),
        args.solid_color.as_deref(),
        args.remove_only,
    )?;

    let service = prepare_service(CliConfigBuilder::one_shot(cli)?, true).await?;

    let encoded = tokio::task::spawn_blocking(move || {
        service.change_background(&image_base64, &background)
    })
    .await
    .context("Processing task failed")??;

    info!("Produced {} output", encoded.format);
    write_stdout(&encoded.image_base64)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_serve(cli: &Cli, args: &ServeArgs) -> Result<ExitCode> {
    let mut config = ServerConfig::from_env(CliConfigBuilder::base(cli)?).with_context(|| {
        format!("Invalid server environment ({PROFILE_ENV}, {HOST_ENV}, {PORT_ENV})")
    })?;
    if let Some(profile) = args.profile {
        config = config.with_profile(profile);
    }
    if let Some(host) = &args.host {
        config = config.with_host(host.clone());
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }

    run_server(config).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_static(args: &StaticArgs) -> Result<ExitCode> {
    let overrides = args
        .routes
        .iter()
        .map(|route| StaticRoutes::parse_override(route))
        .collect::<crate::Result<Vec<_>>>()?;
    let site = StaticSite::new(
        &args.root,
        StaticRoutes::default().with_overrides(overrides),
    );

    run_static_server(&args.host, args.port, site).await?;
    Ok(ExitCode::SUCCESS)
}

async fn download_model(cli: &Cli) -> Result<ExitCode> {
    let target = cli
        .model
        .as_deref()
        .unwrap_or(KnownModel::default_model().id);

    let url = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        KnownModel::find(target)
            .map(|model| model.url.to_string())
            .with_context(|| {
                format!(
                    "Unknown model '{target}'. Known models: {}",
                    known_model_ids().join(", ")
                )
            })?
    };

    println!("📦 Downloading model from: {url}");
    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    let model_id = downloader
        .download_model(&url, true)
        .await
        .context("Failed to download model")?;

    println!("✅ Model ready: {model_id}");
    println!(
        "   Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    Ok(ExitCode::SUCCESS)
}

fn list_models() -> Result<ExitCode> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;
    let cached = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Known models");
    for model in KNOWN_MODELS {
        let status = if cache.is_model_cached(model.id) {
            "cached"
        } else {
            "-"
        };
        println!(
            "  {:<18} {:>5}px  {:<7} {}",
            model.id, model.input_size, status, model.description
        );
    }

    let extra: Vec<_> = cached
        .iter()
        .filter(|info| KnownModel::find(&info.model_id).is_none())
        .collect();
    if !extra.is_empty() {
        println!("\n📁 Other cached models (use --preset when loading)");
        for info in extra {
            println!("  {:<18} {}", info.model_id, format_size(info.size_bytes));
        }
    }

    println!(
        "\nCache directory: {}",
        cache.get_current_cache_dir().display()
    );
    Ok(ExitCode::SUCCESS)
}

fn clear_cache(cli: &Cli) -> Result<ExitCode> {
    let cache = ModelCache::new().context("Failed to create model cache")?;

    if let Some(model_id) = &cli.model {
        if cache
            .clear_specific_model(model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("✅ Removed model: {model_id}");
        } else {
            println!("⚠️  Model '{model_id}' not found in cache");
        }
    } else {
        let removed = cache.clear_all_models().context("Failed to clear cache")?;
        if removed.is_empty() {
            println!("💡 Cache was already empty");
        } else {
            println!("✅ Removed {} model(s):", removed.len());
            for model_id in &removed {
                println!("   • {model_id}");
            }
        }
    }

    println!(
        "   Cache location: {}",
        cache.get_current_cache_dir().display()
    );
    Ok(ExitCode::SUCCESS)
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    println!("\n🔧 Compiled backends:");
    for backend in DefaultBackendFactory.available_backends() {
        let description = match backend {
            BackendType::Onnx => "ONNX Runtime, optional GPU acceleration",
            BackendType::Tract => "pure Rust, CPU only",
        };
        println!("  • {backend}: {description}");
    }

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 ONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "✅" } else { "❌" };
            println!("  {status} {name}: {description}");
        }
    }

    println!("\n💡 Select with --backend onnx|tract and --provider auto|cpu|cuda|coreml");
}

/// Resolve an image argument into a base64 payload
///
/// `@path` reads a file and `-` reads stdin. Either may hold raw image bytes
/// or base64 text. Anything else is taken as base64 already.
fn read_payload(arg: &str) -> Result<String> {
    let bytes = if arg == "-" {
        read_stdin()?
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read(path).with_context(|| format!("Failed to read {path}"))?
    } else {
        return Ok(arg.to_string());
    };
    payload_from_bytes(bytes)
}

fn payload_from_bytes(bytes: Vec<u8>) -> Result<String> {
    if image::guess_format(&bytes).is_ok() {
        return Ok(encode_base64(&bytes));
    }
    String::from_utf8(bytes).context("Input is neither an image nor base64 text")
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}").context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}
