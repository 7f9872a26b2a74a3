//! ImageNerd background removal CLI and servers
//!
//! Thin entry point over `imagenerd_bgremove::cli`.

#[cfg(feature = "cli")]
use imagenerd_bgremove::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<std::process::ExitCode> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() -> std::process::ExitCode {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::ExitCode::FAILURE
}
