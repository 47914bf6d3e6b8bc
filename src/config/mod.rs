//! Application configuration: one TOML file, loaded once at startup.
//!
//! ```toml
//! [logger]
//! level = "info"
//!
//! [store]
//! log_path = "config_log.csv"
//!
//! [session]
//! project_id = "my-project"
//! gateway_certificate_path = "resources/rsa_cert.pem"
//!
//! [transport.credentials]
//! token_file = "resources/gateway.jwt"
//! ```
//!
//! The loaded [`Config`] is immutable and passed by reference to whatever
//! needs it.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{logger::LoggerConfig, session::SessionConfig, store::StoreConfig};

pub mod logger;
pub mod session;
pub mod store;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GATELOG_CONFIG";
const FALLBACK_CONFIG_PATH: &str = "/etc/gatelog/config.toml";

/// Timestamp prefix for the `print_*` macros.
pub fn early_timestamp() -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
    );
    time::OffsetDateTime::now_utc()
        .format(format)
        .unwrap_or_default()
}

/// Timestamped console lines for use before the tracing subscriber exists.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::early_timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub store: StoreConfig,

    #[validate(nested)]
    pub session: SessionConfig,

    /// MQTT bridge connection settings.
    #[validate(nested)]
    pub transport: gatelog_mqtt::Config,
}

impl Config {
    /// Locates the config file and loads it.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// `GATELOG_CONFIG` if set, else `/etc/gatelog/config.toml` if it exists.
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {CONFIG_ENV}: {}", path.display());
            return Ok(path);
        }

        let fallback = Path::new(FALLBACK_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found. Set {CONFIG_ENV} or create {FALLBACK_CONFIG_PATH}"
        )))
    }

    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "Configuration file does not exist: {}",
                path.display()
            )));
        }

        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates a config document.
    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(config)
    }
}
