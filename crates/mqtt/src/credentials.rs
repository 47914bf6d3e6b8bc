//! Username and password resolution for the bridge CONNECT packet.
//!
//! Cloud IoT bridges ignore the username and expect a signed JWT as the
//! password. Minting that token is left to external tooling; this module only
//! locates it. Sources are tried in order: inline `token`, `token_file`
//! (whitespace-trimmed), then the `token_env` environment variable.

use std::fs;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::TransferError;

/// `[transport.credentials]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CredentialsConfig {
    #[validate(length(min = 1, message = "Username cannot be empty"))]
    pub username: String,

    /// Token given directly in the config file.
    pub token: Option<String>,

    /// Path of a file holding the token.
    #[validate(custom(function = "validate_not_blank"))]
    pub token_file: Option<String>,

    /// Name of an environment variable holding the token.
    #[validate(custom(function = "validate_not_blank"))]
    pub token_env: Option<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        CredentialsConfig {
            username: "unused".to_string(),
            token: None,
            token_file: None,
            token_env: Some("GATELOG_JWT".to_string()),
        }
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("Value cannot be blank".into()));
    }
    Ok(())
}

/// Supplies CONNECT credentials when a client is built.
pub trait CredentialProvider: Send + Sync {
    fn username(&self) -> String;

    fn password(&self) -> Result<String, TransferError>;
}

/// Credentials resolved once from configuration (or given directly).
#[derive(Clone)]
pub struct StaticCredentials {
    username: String,
    password: String,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticCredentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Resolves the token from the first configured source that yields one.
    pub fn from_config(config: &CredentialsConfig) -> Result<Self, TransferError> {
        let token = resolve_token(config)?;
        Ok(Self::new(config.username.clone(), token))
    }
}

impl CredentialProvider for StaticCredentials {
    fn username(&self) -> String {
        self.username.clone()
    }

    fn password(&self) -> Result<String, TransferError> {
        if self.password.is_empty() {
            return Err(TransferError::Credentials("password is empty".into()));
        }
        Ok(self.password.clone())
    }
}

fn resolve_token(config: &CredentialsConfig) -> Result<String, TransferError> {
    if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    if let Some(path) = config.token_file.as_deref() {
        let raw = fs::read_to_string(path).map_err(|e| {
            TransferError::Credentials(format!("failed to read token file '{path}': {e}"))
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(TransferError::Credentials(format!(
                "token file '{path}' is empty"
            )));
        }
        return Ok(token.to_string());
    }

    if let Some(var) = config.token_env.as_deref() {
        if let Ok(token) = std::env::var(var) {
            let token = token.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
        return Err(TransferError::Credentials(format!(
            "no token configured and environment variable '{var}' is unset or empty"
        )));
    }

    Err(TransferError::Credentials(
        "no token source configured (token, token_file or token_env)".into(),
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_inline_token_wins() {
        let config = CredentialsConfig {
            token: Some("inline".into()),
            token_file: Some("/nonexistent".into()),
            ..Default::default()
        };
        let creds = StaticCredentials::from_config(&config).unwrap();
        assert_eq!(creds.username(), "unused");
        assert_eq!(creds.password().unwrap(), "inline");
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  eyJhbGciOi.payload.sig  ").unwrap();

        let config = CredentialsConfig {
            token_file: Some(file.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let creds = StaticCredentials::from_config(&config).unwrap();
        assert_eq!(creds.password().unwrap(), "eyJhbGciOi.payload.sig");
    }

    #[test]
    fn test_empty_token_file_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        let config = CredentialsConfig {
            token_file: Some(file.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let err = StaticCredentials::from_config(&config).unwrap_err();
        assert!(matches!(err, TransferError::Credentials(_)));
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        let config = CredentialsConfig {
            token_env: Some("GATELOG_TEST_TOKEN_THAT_IS_NEVER_SET".into()),
            ..Default::default()
        };
        let err = StaticCredentials::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("GATELOG_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_no_source_is_an_error() {
        let config = CredentialsConfig {
            token_env: None,
            ..Default::default()
        };
        assert!(StaticCredentials::from_config(&config).is_err());
    }

    #[test]
    fn test_empty_password_rejected_at_use() {
        let creds = StaticCredentials::new("unused", "");
        assert!(creds.password().is_err());
    }

    #[test]
    fn test_blank_token_env_fails_validation() {
        let config = CredentialsConfig {
            token_env: Some("  ".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
