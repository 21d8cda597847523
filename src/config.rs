//! Runtime configuration
//!
//! Load order (later wins): built-in defaults, the TOML file (`--config`,
//! `TEMPO_CONFIG_PATH`, or `./tempo.toml` if present), `TEMPO_*` environment
//! variables (`TEMPO_APPLET__TIMEOUT_SECS=30`), explicit builder overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::interpreter::InterpreterOptions;

pub const CONFIG_PATH_ENV: &str = "TEMPO_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "tempo";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/* ===================== Sections ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppletConfig {
    /// Interface applet servers bind to
    pub host: String,
    pub port_start: u16,
    pub port_end: u16,
    /// Default deadline for an applet instance
    pub timeout_secs: u64,
}

impl AppletConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppletConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_start: 43100,
            port_end: 43199,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub max_steps: usize,
}

impl InterpreterConfig {
    pub fn options(&self) -> InterpreterOptions {
        InterpreterOptions {
            max_steps: self.max_steps,
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_steps: InterpreterOptions::default().max_steps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "tempo_core=info".to_string(),
        }
    }
}

/* ===================== Config ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub applet: AppletConfig,
    pub interpreter: InterpreterConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let applet = &self.applet;
        if applet.port_start == 0 {
            return Err(ConfigError::Invalid(
                "applet.port_start must be greater than 0".to_string(),
            ));
        }
        if applet.port_start > applet.port_end {
            return Err(ConfigError::Invalid(format!(
                "applet.port_start ({}) is greater than applet.port_end ({})",
                applet.port_start, applet.port_end
            )));
        }
        if applet.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "applet.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.interpreter.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "interpreter.max_steps must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    max_steps: Option<usize>,
    applet_timeout_secs: Option<u64>,
}

impl ConfigBuilder {
    /// Explicit config file; must exist when set
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn applet_timeout_secs(mut self, timeout_secs: Option<u64>) -> Self {
        self.applet_timeout_secs = timeout_secs;
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        let explicit = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        builder = match explicit {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(
                config::File::new(DEFAULT_CONFIG_FILE, config::FileFormat::Toml).required(false),
            ),
        };

        builder = builder
            .add_source(
                config::Environment::with_prefix("TEMPO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("interpreter.max_steps", self.max_steps.map(|n| n as u64))?
            .set_override_option("applet.timeout_secs", self.applet_timeout_secs)?;

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
