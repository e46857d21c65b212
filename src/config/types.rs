//! Relay configuration types.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

static RULE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:-(\d+))?$").unwrap());

static HOST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*$").unwrap());

/// A forwarding rule: connections accepted on `listen_port` are relayed to
/// `remote_port` on the destination host.
///
/// The textual form is `N` (same port on both sides) or `L-R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rule {
    /// Local port to accept client connections on.
    pub listen_port: u16,

    /// Port on the destination host to dial.
    pub remote_port: u16,
}

impl Rule {
    /// Create a new rule.
    #[inline]
    #[must_use]
    pub const fn new(listen_port: u16, remote_port: u16) -> Self {
        Self {
            listen_port,
            remote_port,
        }
    }

    /// Create a rule forwarding a port to the same port on the destination.
    #[inline]
    #[must_use]
    pub const fn same(port: u16) -> Self {
        Self::new(port, port)
    }

    /// Whether both sides of the rule use the same port number.
    #[inline]
    #[must_use]
    pub const fn is_symmetric(&self) -> bool {
        self.listen_port == self.remote_port
    }
}

/// A parsed `N` or `L-R` port argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    /// A single port.
    Single(u16),

    /// A `listen-remote` pair.
    Pair(u16, u16),
}

impl FromStr for PortSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidPort(s.to_string());
        let caps = RULE_PATTERN.captures(s).ok_or_else(invalid)?;

        let parse = |m: regex::Match<'_>| match m.as_str().parse::<u16>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(port) => Ok(port),
        };

        let first = parse(caps.get(1).ok_or_else(invalid)?)?;
        match caps.get(2).map(parse).transpose()? {
            Some(second) => Ok(Self::Pair(first, second)),
            None => Ok(Self::Single(first)),
        }
    }
}

impl From<PortSpec> for Rule {
    fn from(spec: PortSpec) -> Self {
        match spec {
            PortSpec::Single(port) => Rule::same(port),
            PortSpec::Pair(listen, remote) => Rule::new(listen, remote),
        }
    }
}

impl FromStr for Rule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<PortSpec>().map(Rule::from)
    }
}

impl TryFrom<String> for Rule {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rule> for String {
    fn from(rule: Rule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.listen_port, self.remote_port)
    }
}

/// Check that a host is a hostname or IPv4 literal.
#[must_use]
pub fn is_valid_host(host: &str) -> bool {
    HOST_PATTERN.is_match(host)
}

/// Whether a host refers to the local machine.
///
/// Forwarding a port to itself on such a host would loop forever.
#[must_use]
pub fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Configuration for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Destination host every rule forwards to.
    pub host: String,

    /// Initial forwarding rules, in startup order.
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Runtime settings.
    #[serde(default)]
    pub settings: RelaySettings,
}

impl RelayConfig {
    /// Create a config for a destination host with no rules.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            rules: Vec::new(),
            settings: RelaySettings::default(),
        }
    }

    /// Add a rule.
    #[inline]
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Replace the settings.
    #[inline]
    #[must_use]
    pub fn with_settings(mut self, settings: RelaySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Whether the destination host is the local machine.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }
}

/// Runtime settings for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Outbound dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Print relay events (`[opened]`, `[data  ]`, ...) from startup.
    pub verbose: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            verbose: true,
        }
    }
}

impl RelaySettings {
    /// Get the dial timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
