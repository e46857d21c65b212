//! Configuration file loader.

use super::error::{ConfigError, ConfigResult};
use super::types::RelayConfig;
use super::validation::{BasicValidator, LoopbackValidator, PortConflictValidator, Validator};
use std::path::Path;
use tracing::warn;

/// Configuration loader with validation support.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Validators to run on loaded configuration.
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader with every built-in validator registered.
    #[must_use]
    pub fn with_default_validators() -> Self {
        Self::new()
            .with_validator(BasicValidator::new())
            .with_validator(PortConflictValidator::new())
            .with_validator(LoopbackValidator::new())
    }

    /// Add a validator to the loader.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The TOML is malformed
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<RelayConfig> {
        let config = self.read(path)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Read and parse a configuration file without validating it.
    ///
    /// Used when the caller still merges command-line values into the
    /// result before calling [`ConfigLoader::validate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, or malformed.
    pub fn read<P: AsRef<Path>>(&self, path: P) -> ConfigResult<RelayConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The TOML is malformed
    /// - Validation fails
    pub fn load_str(&self, content: &str) -> ConfigResult<RelayConfig> {
        let config: RelayConfig = toml::from_str(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Validate a configuration against all registered validators.
    ///
    /// Warnings are logged; the first validator reporting errors fails the
    /// whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] with every error message of
    /// the failing validator joined by `"; "`.
    pub fn validate(&self, config: &RelayConfig) -> ConfigResult<()> {
        for validator in &self.validators {
            let result = validator.validate(config);
            for warning in result.warnings() {
                warn!(field = %warning.field, "{}", warning.message);
            }
            if !result.is_valid() {
                let errors: Vec<String> = result
                    .errors_only()
                    .iter()
                    .map(|e| e.message.clone())
                    .collect();
                return Err(ConfigError::ValidationError(errors.join("; ")));
            }
        }
        Ok(())
    }
}
