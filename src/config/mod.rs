//! # Configuration
//!
//! Destination host, forwarding rules and runtime settings, loaded from the
//! command line or a TOML file and checked by a chain of validators.
//!
//! ## Example Configuration
//!
//! ```toml
//! host = "10.0.0.5"
//! rules = ["22", "8080-80"]
//!
//! [settings]
//! connect_timeout_secs = 5
//! verbose = true
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{is_loopback_host, is_valid_host, PortSpec, RelayConfig, RelaySettings, Rule};
pub use validation::{
    BasicValidator, LoopbackValidator, PortConflictValidator, ValidationError, ValidationResult,
    ValidationSeverity, Validator,
};
