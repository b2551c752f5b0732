//! Configuration models and the environment-driven loader.

pub mod storage_root;
pub mod tuning;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use storage_root::StorageRootConfig;
use tuning::{HealthConfig, ResilienceConfig, ScannerConfig, WatchConfig};

/// Source that produced the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level Fathom settings: the declared storage roots plus runtime
/// tuning for everything built on top of them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FathomConfig {
    pub roots: Vec<StorageRootConfig>,
    pub resilience: ResilienceConfig,
    pub scanner: ScannerConfig,
    pub watch: WatchConfig,
    pub health: HealthConfig,
}

impl FathomConfig {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$FATHOM_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$FATHOM_CONFIG_JSON` (inline JSON),
    /// 3) the first default file candidate that exists,
    /// 4) built-in defaults.
    pub fn load_from_env() -> Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var("FATHOM_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            debug!(path = %path.display(), "loading configuration from $FATHOM_CONFIG_PATH");
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("FATHOM_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            debug!("loading inline configuration from $FATHOM_CONFIG_JSON");
            let parsed = Self::parse_json(&raw, "$FATHOM_CONFIG_JSON")?;
            parsed.validate()?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            debug!(path = %path.display(), "loading configuration from default location");
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        debug!("no configuration file found, using built-in defaults");
        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let origin = path.display().to_string();

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents, &origin)?,
            Some("toml") | Some("tml") => {
                toml::from_str(&contents).map_err(|err| {
                    ConfigError::Parse {
                        origin: origin.clone(),
                        message: err.to_string(),
                    }
                })?
            }
            _ => Self::parse_from_str(&contents, &origin)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Try TOML first, then JSON for convenience.
    pub fn parse_from_str(contents: &str, origin: &str) -> Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                ConfigError::Parse {
                    origin: origin.to_string(),
                    message: format!(
                        "toml error: {toml_err}; json error: {json_err}"
                    ),
                }
            })
        })
    }

    pub fn parse_json(raw: &str, origin: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Parse {
            origin: origin.to_string(),
            message: err.to_string(),
        })
    }

    /// Shape-level checks that do not require protocol knowledge: root
    /// names must be present and unique. Protocol-specific requirements
    /// are the client factory's job.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for root in &self.roots {
            if root.name.trim().is_empty() {
                return Err(ConfigError::Root {
                    root: root.name.clone(),
                    message: "name must not be empty".to_string(),
                });
            }
            if !seen.insert(root.name.as_str()) {
                return Err(ConfigError::Root {
                    root: root.name.clone(),
                    message: "duplicate root name".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn enabled_roots(&self) -> impl Iterator<Item = &StorageRootConfig> {
        self.roots.iter().filter(|root| root.enabled)
    }

    fn find_default_file() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "fathom.toml",
            "fathom.json",
            "config/fathom.toml",
            "config/fathom.json",
        ];

        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| path.to_path_buf())
    }
}
