//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{BridgeError, Result};

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// automatic loading, validation, and access to common config fields.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use tagbridge_framework::{BridgeConfig, BridgeError, LoggingConfig};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyBridgeConfig {
///     #[serde(default)]
///     pub logging: LoggingConfig,
///     pub poll_interval_secs: u64,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> Result<(), BridgeError> {
///         if self.poll_interval_secs == 0 {
///             return Err(BridgeError::validation("poll interval must be >= 1s"));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON5 file without validating it.
    ///
    /// For callers that layer more values on top before calling
    /// [`validate`](Self::validate) themselves.
    fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Ok(json5::from_str(&content)?)
    }

    /// [`read`](Self::read) `path` when given, otherwise start from [`Default`].
    ///
    /// Nothing is validated.
    fn read_or_default(path: Option<&Path>) -> Result<Self>
    where
        Self: Default,
    {
        match path {
            Some(path) => Self::read(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        interval: u64,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.interval > 100 {
                return Err(BridgeError::validation("interval too large"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_config_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ interval: ").unwrap();

        let result = TestConfig::load(file.path());
        assert!(matches!(result, Err(BridgeError::ConfigParse(_))));
    }

    #[test]
    fn test_config_validation_runs_after_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ interval: 500 }}").unwrap();

        let result = TestConfig::load(file.path());
        assert!(matches!(result, Err(BridgeError::ConfigValidation(_))));
    }

    #[test]
    fn test_read_or_default_without_path() {
        let config = TestConfig::read_or_default(None).unwrap();
        assert_eq!(config.interval, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_read_skips_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ interval: 500 }}").unwrap();

        let config = TestConfig::read_or_default(Some(file.path())).unwrap();
        assert_eq!(config.interval, 500);
        assert!(config.validate().is_err());
    }
}
