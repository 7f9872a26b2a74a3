//! Conversion of CLI arguments into processing configuration

use crate::cli::main_impl::Cli;
use crate::{
    config::{CompositeOutput, RemovalConfig},
    models::ModelSpec,
    server::ServerProfile,
};
use anyhow::{Context, Result};

/// JPEG quality for one-shot composites
const ONE_SHOT_JPEG_QUALITY: u8 = 95;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Model, backend and threading settings shared by every subcommand
    pub(crate) fn base(cli: &Cli) -> Result<RemovalConfig> {
        let mut builder = RemovalConfig::builder()
            .model_spec(Self::model_spec(cli))
            .num_threads(cli.threads);

        if let Some(backend) = cli.backend {
            builder = builder.backend(backend);
        }
        if let Some(provider) = cli.provider {
            builder = builder.execution_provider(provider);
        }

        builder.build().context("Invalid configuration")
    }

    /// Settings for `stdin`: capped input, compact output
    pub(crate) fn stdin(cli: &Cli) -> Result<RemovalConfig> {
        Ok(ServerProfile::LowResource.removal_config(Self::base(cli)?))
    }

    /// Settings for `remove` and `change`: composites follow the input format
    pub(crate) fn one_shot(cli: &Cli) -> Result<RemovalConfig> {
        Ok(RemovalConfig {
            jpeg_quality: ONE_SHOT_JPEG_QUALITY,
            composite_output: CompositeOutput::MatchInput,
            ..Self::base(cli)?
        })
    }

    pub(crate) fn model_spec(cli: &Cli) -> ModelSpec {
        match &cli.model {
            Some(model) => ModelSpec::parse(model, cli.preset.clone()),
            None => ModelSpec {
                preset: cli.preset.clone(),
                ..ModelSpec::default()
            },
        }
    }
}
