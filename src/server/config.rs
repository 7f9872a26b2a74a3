//! HTTP server configuration

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
};
use serde::{Deserialize, Serialize};

pub const HOST_ENV: &str = "IMAGENERD_HOST";
pub const PORT_ENV: &str = "IMAGENERD_PORT";
pub const PROFILE_ENV: &str = "IMAGENERD_PROFILE";

/// Default port for the image API
pub const DEFAULT_API_PORT: u16 = 5001;
/// Default port for the static frontend server
pub const DEFAULT_STATIC_PORT: u16 = 3000;

const MIB: usize = 1024 * 1024;

/// Resource profile for the image API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerProfile {
    /// Eager model load, full resolution, high quality JPEG
    #[default]
    Standard,
    /// Lazy model load, capped resolution, smaller output, lowered priority
    LowResource,
}

impl ServerProfile {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::LowResource => "low-resource",
        }
    }

    #[must_use]
    pub fn default_host(self) -> &'static str {
        match self {
            Self::Standard => "localhost",
            Self::LowResource => "0.0.0.0",
        }
    }

    #[must_use]
    pub fn max_body_bytes(self) -> usize {
        match self {
            Self::Standard => 100 * MIB,
            Self::LowResource => 50 * MIB,
        }
    }

    /// Whether the inference session is created before serving
    #[must_use]
    pub fn eager_model_load(self) -> bool {
        matches!(self, Self::Standard)
    }

    /// Scheduling priority adjustment applied at startup
    #[must_use]
    pub fn nice_increment(self) -> Option<i32> {
        match self {
            Self::Standard => None,
            Self::LowResource => Some(10),
        }
    }

    /// Apply this profile's encode settings on top of `base`
    ///
    /// Model, backend and threading choices in `base` are kept.
    #[must_use]
    pub fn removal_config(self, base: RemovalConfig) -> RemovalConfig {
        let (max_dimension, jpeg_quality) = match self {
            Self::Standard => (None, 95),
            Self::LowResource => (Some(2048), 85),
        };
        RemovalConfig {
            max_dimension,
            jpeg_quality,
            png_compression: 6,
            composite_output: crate::config::CompositeOutput::Jpeg,
            ..base
        }
    }
}

impl std::fmt::Display for ServerProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServerProfile {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "standard" => Ok(Self::Standard),
            "low-resource" | "low" | "optimized" => Ok(Self::LowResource),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown server profile '{other}' (expected standard or low-resource)"
            ))),
        }
    }
}

/// Image API server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub profile: ServerProfile,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Processing settings derived from the profile
    pub removal: RemovalConfig,
}

impl ServerConfig {
    /// Defaults for `profile`, layered over `base`
    #[must_use]
    pub fn for_profile(profile: ServerProfile, base: RemovalConfig) -> Self {
        Self {
            host: profile.default_host().to_string(),
            port: DEFAULT_API_PORT,
            profile,
            max_body_bytes: profile.max_body_bytes(),
            removal: profile.removal_config(base),
        }
    }

    /// Read `IMAGENERD_PROFILE`, `IMAGENERD_HOST` and `IMAGENERD_PORT`
    ///
    /// Unset variables fall back to the profile defaults.
    ///
    /// # Errors
    /// - Unknown profile name
    /// - Port that is not a valid u16
    pub fn from_env(base: RemovalConfig) -> Result<Self> {
        Self::from_lookup(base, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(base: RemovalConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let profile = match value(PROFILE_ENV) {
            Some(raw) => raw.parse()?,
            None => ServerProfile::default(),
        };

        let mut config = Self::for_profile(profile, base);
        if let Some(host) = value(HOST_ENV) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = value(PORT_ENV) {
            config.port = port.trim().parse().map_err(|_| {
                BgRemovalError::invalid_config(format!("Invalid {PORT_ENV} '{port}'"))
            })?;
        }
        Ok(config)
    }

    /// Switch to `profile`, re-deriving its limits and encode settings
    ///
    /// A host that is still the old profile's default follows the new one.
    #[must_use]
    pub fn with_profile(mut self, profile: ServerProfile) -> Self {
        if self.host == self.profile.default_host() {
            self.host = profile.default_host().to_string();
        }
        self.profile = profile;
        self.max_body_bytes = profile.max_body_bytes();
        self.removal = profile.removal_config(self.removal);
        self
    }

    #[must_use]
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
