//! Command-line interface.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{ConfigError, ConfigLoader, ConfigResult, RelayConfig, Rule};

/// Exit status for command-line usage errors.
pub const EX_USAGE: u8 = 64;

/// Exit status for failures after the command line was accepted.
pub const EX_SOFTWARE: u8 = 70;

/// nano-tcp-relay - forward local TCP ports to a remote host.
#[derive(Debug, Parser)]
#[command(
    name = "nano-tcp-relay",
    version,
    about = "Forward local TCP ports to a remote host",
    after_help = "PORTS:\n  \
        NUMBER        Forward a single TCP port to the same destination port\n  \
        LOCAL-REMOTE  Forward traffic from a local port to a different remote port\n\n\
        Rules can be added and removed at runtime from the console; type 'h' for help."
)]
pub struct Cli {
    /// IP address or host name to forward to (required unless set in --config)
    #[arg(value_name = "HOST")]
    pub host: Option<String>,

    /// Ports to forward
    #[arg(value_name = "PORTS", value_parser = parse_rule)]
    pub rules: Vec<Rule>,

    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Start with event output turned off
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Outbound connect timeout in seconds
    #[arg(long = "connect-timeout", value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Diagnostic log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_rule(s: &str) -> Result<Rule, String> {
    s.parse().map_err(|e: ConfigError| e.to_string())
}

impl Cli {
    /// Build the effective configuration.
    ///
    /// Values from `--config` come first; a host on the command line
    /// replaces the file's host and command-line rules are appended.
    ///
    /// # Errors
    ///
    /// Returns an error if no host is given, the file cannot be read, or
    /// the merged configuration fails validation.
    pub fn into_config(self) -> ConfigResult<RelayConfig> {
        let loader = ConfigLoader::with_default_validators();

        let mut config = match (&self.config, self.host) {
            (Some(path), host) => {
                let mut config = loader.read(path)?;
                if let Some(host) = host {
                    config.host = host;
                }
                config
            },
            (None, Some(host)) => RelayConfig::new(host),
            (None, None) => return Err(ConfigError::MissingHost),
        };

        config.rules.extend(self.rules);
        if let Some(secs) = self.connect_timeout {
            config.settings.connect_timeout_secs = secs;
        }
        if self.quiet {
            config.settings.verbose = false;
        }

        loader.validate(&config)?;
        Ok(config)
    }
}
