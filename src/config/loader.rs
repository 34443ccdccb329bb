//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and `NATS_BRIDGE__*`
//! environment variables into a validated [`BridgeConfig`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::BridgeConfig;
use crate::constants::env;
use crate::error::Result;

/// Loaded configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: BridgeConfig,
    environment: String,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Defaults plus process environment overrides
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_with_overrides(None, None)
    }

    /// Defaults, then `path`, then process environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Arc<ConfigManager>> {
        Self::load_with_overrides(Some(path.as_ref()), None)
    }

    /// Load with an explicit override map in place of the process environment
    ///
    /// Keys use the same form as environment variables
    /// (`NATS_BRIDGE__POOL__POOL_SIZE`). This is useful for testing without
    /// modifying global environment variables.
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: Option<HashMap<String, String>>,
    ) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        debug!(
            environment = %environment,
            file = ?path.map(Path::display),
            "Loading bridge configuration"
        );

        let config = Self::build(path, overrides)?;
        config.validate()?;

        info!(
            environment = %environment,
            servers = %config.endpoint.servers_string(),
            topic = %config.endpoint.topic,
            pool_size = config.pool.pool_size,
            cloud_mode = config.endpoint.cloud_mode,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            source_file: path.map(Path::to_path_buf),
        }))
    }

    fn build(
        path: Option<&Path>,
        overrides: Option<HashMap<String, String>>,
    ) -> Result<BridgeConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&BridgeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let environment = Environment::with_prefix(env::CONFIG_PREFIX)
            .separator(env::CONFIG_SEPARATOR)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("endpoint.servers")
            .source(overrides);

        let config = builder.add_source(environment).build()?;
        Ok(config.try_deserialize::<BridgeConfig>()?)
    }

    /// `NATS_BRIDGE_ENV`, defaulting to `development`
    pub fn detect_environment() -> String {
        std::env::var(env::BRIDGE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }
}
