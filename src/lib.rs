//! # nano-tcp-relay
//!
//! A small TCP port forwarder whose rules can be changed while it runs.
//!
//! Every rule maps a local listen port to a port on one destination host.
//! Each accepted client gets its own outbound connection and bytes are
//! relayed in both directions until either side closes.
//!
//! ## Modules
//!
//! - [`config`]: rules, settings, TOML loading and validation
//! - [`relay`]: listeners, sessions, and the rule registry
//! - [`console`]: the interactive operator console
//! - [`cli`]: command-line parsing
//! - [`logging`]: diagnostic tracing setup

pub mod cli;
pub mod config;
pub mod console;
pub mod logging;
pub mod relay;
