//! Bridge connection settings, loaded from the `[transport]` table.
//!
//! Every field has a default aimed at the Cloud IoT MQTT bridge
//! (`mqtt.googleapis.com:8883`, TLS with the Google root CA bundle, JWT as
//! password). Validation runs through the `validator` crate when the
//! surrounding application config is loaded, and again when a client is
//! built.
//!
//! ```toml
//! [transport]
//! host = "mqtt.googleapis.com"
//! port = 8883
//! keep_alive = 60
//! reconnect_delay = 1
//! max_reconnect_attempts = 5
//!
//! [transport.tls]
//! ca_cert_path = "resources/roots.pem"
//!
//! [transport.credentials]
//! token_file = "resources/gateway.jwt"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::credentials::CredentialsConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// 8883 for the TLS bridge, 1883 for a plain local broker.
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Seconds to wait for CONNACK before a connect attempt counts as failed.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    pub clean_session: bool,

    /// QoS 1/2 publishes allowed in flight at once.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    /// PINGREQ interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Incoming and outgoing packet size limit in bytes.
    #[validate(range(
        min = 64,
        max = 268435455,
        message = "Max packet size must be between 64 bytes and 256 MiB"
    ))]
    pub max_packet_size: Option<u32>,

    /// Requests that can be queued towards the event loop before callers wait.
    #[validate(range(
        min = 1,
        max = 1024,
        message = "Request channel capacity must be between 1 and 1024"
    ))]
    pub request_channel_capacity: Option<u16>,

    /// Initial reconnect delay in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Reconnect delay cap in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_reconnect_delay: u64,

    /// Growth factor applied to the delay after each failed attempt.
    #[validate(range(
        min = 1.0,
        max = 10.0,
        message = "Reconnect multiplier must be between 1.0 and 10.0"
    ))]
    pub reconnect_multiplier: f64,

    /// Failed attempts tolerated before giving up; 0 retries forever.
    #[validate(range(
        max = 100,
        message = "Max reconnect attempts must be between 0 and 100"
    ))]
    pub max_reconnect_attempts: u32,

    /// TLS settings; `None` or an empty CA path means plain TCP.
    #[validate(nested)]
    pub tls: Option<TlsConfig>,

    /// Where the bridge password (a pre-minted JWT) comes from.
    #[validate(nested)]
    pub credentials: CredentialsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "mqtt.googleapis.com".to_string(),
            port: 8883,
            connection_timeout: 30,
            clean_session: true,
            max_inflight: 20,
            keep_alive: 60,
            max_packet_size: Some(256 * 1024),
            request_channel_capacity: Some(64),
            reconnect_delay: 1,
            max_reconnect_delay: 32,
            reconnect_multiplier: 2.0,
            max_reconnect_attempts: 5,
            tls: Some(TlsConfig::with_ca_only("resources/roots.pem")),
            credentials: CredentialsConfig::default(),
        }
    }
}

impl Config {
    /// Returns the TLS settings when they actually enable TLS.
    pub fn effective_tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref().filter(|tls| tls.is_enabled())
    }
}

/// PEM file locations for the TLS transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// CA bundle used to verify the bridge certificate.
    #[validate(custom(function = "validate_non_empty_path"))]
    pub ca_cert_path: Option<String>,

    /// Client certificate for mutual TLS; must be paired with `client_key_path`.
    #[validate(custom(function = "validate_non_empty_path"))]
    pub client_cert_path: Option<String>,

    /// Unencrypted PEM private key for mutual TLS.
    #[validate(custom(function = "validate_non_empty_path"))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    pub fn new(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Checks that the referenced files exist and that client auth is not half-configured.
    ///
    /// Runs at client build time rather than at config load time so that a
    /// config can be parsed on a machine without the certificates.
    pub fn validate_files(&self) -> Result<(), ValidationError> {
        let ca = self.ca_cert_path.as_deref().ok_or_else(|| {
            ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into())
        })?;
        validate_file_path(ca)?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)
            }
            (None, None) => Ok(()),
            _ => Err(ValidationError::new("incomplete_client_auth")
                .with_message("Both client certificate and key must be provided or neither".into())),
        }
    }
}

fn validate_non_empty_path(path: &str) -> Result<(), ValidationError> {
    if path.trim().is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }
    Ok(())
}

fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    validate_non_empty_path(path)?;

    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }
    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_host_is_rejected() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.to_string().contains("host"));
    }

    #[test]
    fn test_keep_alive_lower_bound() {
        let config = Config {
            keep_alive: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_from_toml() {
        let config: Config = toml::from_str(
            r#"
            host = "localhost"
            port = 1883
            max_reconnect_attempts = 0

            [credentials]
            token = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.credentials.token.as_deref(), Some("abc"));
        // untouched fields keep their defaults
        assert_eq!(config.keep_alive, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_tls_ignores_empty_ca() {
        let config = Config {
            tls: Some(TlsConfig {
                ca_cert_path: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.effective_tls().is_none());

        let config = Config {
            tls: None,
            ..Default::default()
        };
        assert!(config.effective_tls().is_none());
    }

    #[test]
    fn test_tls_file_validation() {
        let mut ca = NamedTempFile::new().unwrap();
        ca.write_all(b"ca").unwrap();
        let ca_path = ca.path().to_string_lossy().into_owned();

        assert!(TlsConfig::with_ca_only(&ca_path).validate_files().is_ok());
        assert!(TlsConfig::with_ca_only("/nonexistent/roots.pem")
            .validate_files()
            .is_err());

        let half = TlsConfig {
            ca_cert_path: Some(ca_path.clone()),
            client_cert_path: Some(ca_path),
            client_key_path: None,
        };
        assert!(!half.has_client_auth());
        assert!(half.validate_files().is_err());
    }
}
