//! Operator console.
//!
//! Reads single-letter commands and applies them to a running
//! [`ListenerRegistry`](crate::relay::ListenerRegistry):
//!
//! ```text
//! h / empty : usage         p : events on       l : list rules
//! s         : counters      q : quit
//! a <port>  : add rule (N or L-R)
//! d <port>  : remove rule
//! ```

mod command;
mod input;
mod repl;

pub use command::{Command, CommandError};
pub use input::{spawn_line_reader, spawn_stdin_reader};
pub use repl::{Console, ConsoleFlow, PROMPT};
