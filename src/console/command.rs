//! Console command parsing.

use std::str::FromStr;

use thiserror::Error;

use crate::config::{PortSpec, Rule};

/// A parsed console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `h` or an empty line: print usage.
    Help,

    /// `p`: turn event output on.
    Print,

    /// `l`: list rules.
    List,

    /// `s`: show counters.
    Stats,

    /// `a <port>` or `a <listen>-<remote>`: add a rule.
    Add(Rule),

    /// `d <port>`: remove a rule.
    Delete(u16),

    /// `q`: shut down and exit.
    Quit,
}

/// A console line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// `a` or `d` without a port.
    #[error("Lack of argument: port")]
    MissingPort,

    /// Port argument is not a number, a pair, or in 1..=65535.
    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    /// `d` given a `listen-remote` pair.
    #[error("Delete command only accepts one port number, not a port pair")]
    PairNotAllowed,

    /// Extra words after a complete command.
    #[error("Too many arguments: {0}")]
    TooManyArguments(String),

    /// Unrecognized command word.
    #[error("Unknown command: {0}")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(Self::Help);
        };
        let arg = words.next();
        if words.next().is_some() {
            return Err(CommandError::TooManyArguments(line.to_string()));
        }

        let command = match word {
            "h" => Self::Help,
            "p" => Self::Print,
            "l" => Self::List,
            "s" => Self::Stats,
            "q" => Self::Quit,
            "a" | "d" => {
                let arg = arg.ok_or(CommandError::MissingPort)?;
                let spec: PortSpec = arg
                    .parse()
                    .map_err(|_| CommandError::InvalidPort(arg.to_string()))?;
                return match (word, spec) {
                    ("a", spec) => Ok(Self::Add(spec.into())),
                    (_, PortSpec::Single(port)) => Ok(Self::Delete(port)),
                    (_, PortSpec::Pair(..)) => Err(CommandError::PairNotAllowed),
                };
            },
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        match arg {
            Some(_) => Err(CommandError::TooManyArguments(line.to_string())),
            None => Ok(command),
        }
    }
}
