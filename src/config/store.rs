//! `[store]` table: where received messages are recorded.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StoreConfig {
    /// CSV file; created with a header on the first recorded message.
    #[validate(custom(function = "validate_log_path"))]
    pub log_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            log_path: PathBuf::from("config_log.csv"),
        }
    }
}

fn validate_log_path(path: &PathBuf) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("empty_path").with_message("log_path cannot be empty".into()));
    }
    if path.is_dir() {
        return Err(ValidationError::new("is_directory")
            .with_message(format!("log_path is a directory: {}", path.display()).into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path() {
        let config = StoreConfig::default();
        assert_eq!(config.log_path, PathBuf::from("config_log.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            log_path: dir.path().to_path_buf(),
        };
        assert!(config.validate().is_err());
    }
}
