//! `swarmforge.toml` loading.

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarmforge_client::SessionConfig;
use swarmforge_core::{DEFAULT_HOST, DEFAULT_PORT};

pub const DEFAULT_CONFIG_FILE: &str = "swarmforge.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub close_timeout_secs: u64,
    /// How long to wait for each correlated response.
    pub response_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_secs: 10,
            close_timeout_secs: 5,
            response_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            close_timeout: Duration::from_secs(self.close_timeout_secs),
            ..SessionConfig::default()
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Which implementation fills a backend slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    Stub,
    /// Delegate to the orchestrator. Scripting only.
    Remote,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub primitive: BackendChoice,
    pub scripting: BackendChoice,
    pub image: BackendChoice,
    pub procedural: BackendChoice,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primitive: BackendChoice::Stub,
            scripting: BackendChoice::Remote,
            image: BackendChoice::Stub,
            procedural: BackendChoice::Stub,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive. `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "swarmforge=info,warn".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Load `path`, or `swarmforge.toml` in the working directory when it
    /// exists, or the defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    fn check(&self) -> anyhow::Result<()> {
        for (slot, choice) in [
            ("primitive", self.generation.primitive),
            ("image", self.generation.image),
            ("procedural", self.generation.procedural),
        ] {
            if choice == BackendChoice::Remote {
                bail!(
                    "generation.{slot} cannot be `remote`; only scripting runs on the orchestrator"
                );
            }
        }
        if self.server.host.trim().is_empty() {
            bail!("server.host must not be empty");
        }
        Ok(())
    }
}
