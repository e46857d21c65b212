//! Configuration validation system.

use std::collections::HashSet;

use super::types::{is_valid_host, RelayConfig};

/// A single validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// Error message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error to the result.
    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all validation issues, errors and warnings alike.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors_only(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any errors.
    fn validate(&self, config: &RelayConfig) -> ValidationResult;
}

/// Checks the destination host syntax and that every port is non-zero.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &RelayConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if !is_valid_host(&config.host) {
            result.add_error(ValidationError::error(
                "host",
                format!("Invalid host: {}", config.host),
            ));
        }

        for (i, rule) in config.rules.iter().enumerate() {
            if rule.listen_port == 0 || rule.remote_port == 0 {
                result.add_error(ValidationError::error(
                    format!("rules[{i}]"),
                    format!("Invalid port number: {rule}"),
                ));
            }
        }

        if config.rules.is_empty() {
            result.add_error(ValidationError::warning(
                "rules",
                "No forwarding rules configured; add them from the console",
            ));
        }

        result
    }
}

/// Rejects two rules that listen on the same port.
#[derive(Debug, Default)]
pub struct PortConflictValidator;

impl PortConflictValidator {
    /// Create a new port conflict validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for PortConflictValidator {
    fn validate(&self, config: &RelayConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        let mut used_ports = HashSet::new();

        for (i, rule) in config.rules.iter().enumerate() {
            if !used_ports.insert(rule.listen_port) {
                result.add_error(ValidationError::error(
                    format!("rules[{i}]"),
                    format!("Duplicate listen port: {}", rule.listen_port),
                ));
            }
        }

        result
    }
}

/// Rejects rules that would forward a loopback port onto itself.
#[derive(Debug, Default)]
pub struct LoopbackValidator;

impl LoopbackValidator {
    /// Create a new loopback validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for LoopbackValidator {
    fn validate(&self, config: &RelayConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        if !config.is_loopback() {
            return result;
        }

        for (i, rule) in config.rules.iter().enumerate() {
            if rule.is_symmetric() {
                result.add_error(ValidationError::error(
                    format!("rules[{i}]"),
                    format!(
                        "Localhost infinite loop is dangerous: {} forwards to itself",
                        rule.listen_port
                    ),
                ));
            }
        }

        result
    }
}
