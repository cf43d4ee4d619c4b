//! Configuration Loader
//!
//! Environment-aware layering built on the `config` crate:
//! 0. Defaults from the `Default` impls of each section
//! 1. `config/outreach.toml` (or the file named by `OUTREACH_CONFIG_PATH`)
//! 2. `config/outreach.{environment}.toml` when present
//! 3. `OUTREACH__SECTION__FIELD` environment variables
//!
//! The merged result is validated before it is handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::OutreachConfig;
use ::config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONFIG_DIR: &str = "config";
const CONFIG_BASENAME: &str = "outreach";

/// Loaded, validated configuration plus the environment it was resolved for
#[derive(Debug)]
pub struct ConfigManager {
    config: OutreachConfig,
    environment: String,
    source_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let explicit = env::var("OUTREACH_CONFIG_PATH").ok().map(PathBuf::from);
        Self::load_from_path_with_env(explicit, &Self::detect_environment())
    }

    /// Load configuration from a specific file with an explicit environment.
    /// Useful for tests that must not touch global environment variables.
    pub fn load_from_path_with_env(
        path: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Config::builder();

        let base_path = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigurationError::ConfigFileNotFound { path: explicit });
                }
                builder =
                    builder.add_source(File::from(explicit.as_path()).format(FileFormat::Toml));
                Some(explicit)
            }
            None => {
                let default_path =
                    Path::new(DEFAULT_CONFIG_DIR).join(format!("{CONFIG_BASENAME}.toml"));
                if default_path.exists() {
                    builder = builder
                        .add_source(File::from(default_path.as_path()).format(FileFormat::Toml));
                    Some(default_path)
                } else {
                    None
                }
            }
        };

        if let Some(override_path) = base_path
            .as_deref()
            .and_then(|base| Self::environment_override_path(base, environment))
        {
            debug!(
                override_file = %override_path.display(),
                environment = environment,
                "Applying environment configuration override"
            );
            builder = builder.add_source(
                File::from(override_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("OUTREACH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("proxy.proxies"),
        );

        let config: OutreachConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            environment = environment,
            config_file = ?base_path,
            lock_key = %config.runtime_lock.lock_key,
            outbox_enabled = config.outbox.webhook_url.is_some(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source_path: base_path,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(
        config: OutreachConfig,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            source_path: None,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OutreachConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Current environment from `OUTREACH_ENV`, then `APP_ENV`, default `development`
    pub fn detect_environment() -> String {
        env::var("OUTREACH_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// `outreach.toml` -> `outreach.test.toml` alongside the base file
    fn environment_override_path(base: &Path, environment: &str) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let candidate = base.with_file_name(format!("{stem}.{environment}.toml"));
        candidate.exists().then_some(candidate)
    }
}
