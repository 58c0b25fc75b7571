//! Configuration management for tessera-rt.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`TESSERA_ENV`, `TESSERA_TRACE_CHANNELS`)
//! 2. Project-local config file (`./tessera-rt.toml`)
//! 3. User config file (`~/.config/tessera-rt/config.toml`)
//! 4. Built-in defaults
//!
//! The environment variant is detected once per process and treated as
//! immutable afterwards; the runtime copies the configuration into itself at
//! boot and cores only ever read it through their context.
//!
//! # Config File Format
//!
//! ```toml
//! # tessera-rt.toml
//!
//! # Fabric variant: "model" (default) or "strict" (extra invariant checks)
//! environment = "strict"
//!
//! # Log every channel operation at trace level
//! trace_channels = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Fabric variant the runtime is hosted on.
///
/// The reference model runs every core as a host thread. The strict variant
/// is the same fabric with additional invariant checking (credit audits on
/// every send, claim checks on connect) enabled; it is meant for debugging
/// new communication patterns and is noticeably slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// In-process threaded fabric model.
    #[default]
    Model,
    /// Model with per-operation invariant auditing.
    Strict,
}

/// tessera-rt configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Detected or configured fabric variant.
    pub environment: Environment,

    /// Log every channel send/receive at trace level. Off by default
    /// because pattern inner loops are chatty.
    pub trace_channels: bool,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `tessera-rt.toml`
    /// 3. User config `~/.config/tessera-rt/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_from_file(Path::new("tessera-rt.toml")) {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached per-process configuration.
    ///
    /// Loads configuration on first call and caches it; the result never
    /// changes for the lifetime of the process.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Whether strict invariant auditing is enabled.
    #[inline]
    pub fn strict(&self) -> bool {
        self.environment == Environment::Strict
    }

    /// Load user configuration from the platform config directory.
    fn load_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let config_path = config_dir.join("tessera-rt").join("config.toml");
        Self::load_from_file(&config_path)
    }

    /// Load configuration from a TOML file, returning None on any failure.
    fn load_from_file(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&contents) {
            Ok(config) => {
                log::debug!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Overlay another configuration on top of this one.
    fn merge(&mut self, other: Config) {
        self.environment = other.environment;
        self.trace_channels = other.trace_channels;
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(env) = std::env::var("TESSERA_ENV") {
            match env.as_str() {
                "model" => self.environment = Environment::Model,
                "strict" => self.environment = Environment::Strict,
                other => log::warn!("Unknown TESSERA_ENV value: {}", other),
            }
        }
        if let Ok(v) = std::env::var("TESSERA_TRACE_CHANNELS") {
            self.trace_channels = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }
}
