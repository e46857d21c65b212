//! Interactive command loop.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::command::Command;
use crate::relay::ListenerRegistry;

/// Prompt printed before every command.
pub const PROMPT: &str = "COMMAND> ";

/// What the console loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFlow {
    /// Read the next command.
    Continue,

    /// The relay has been shut down; stop reading.
    Quit,
}

/// Operator console driving a [`ListenerRegistry`].
///
/// Command responses go to `output`; relay events keep going to the
/// registry's event log.
#[derive(Debug)]
pub struct Console<W> {
    registry: Arc<ListenerRegistry>,
    output: W,
}

impl<W: AsyncWrite + Unpin> Console<W> {
    /// Create a console.
    pub fn new(registry: Arc<ListenerRegistry>, output: W) -> Self {
        Self { registry, output }
    }

    /// Consume the console, returning the output writer.
    pub fn into_output(self) -> W {
        self.output
    }

    /// Prompt, read and execute lines until `q` or end of input.
    ///
    /// End of input shuts the relay down like `q`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the output fails.
    pub async fn run(&mut self, mut lines: mpsc::Receiver<String>) -> io::Result<()> {
        loop {
            self.write(PROMPT).await?;
            let Some(line) = lines.recv().await else {
                debug!("Console input closed");
                self.write("\n").await?;
                self.registry.shutdown_all().await;
                return Ok(());
            };
            if self.execute(&line).await? == ConsoleFlow::Quit {
                return Ok(());
            }
        }
    }

    /// Execute one command line.
    ///
    /// Every command except `p` turns event output off first.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the output fails.
    pub async fn execute(&mut self, line: &str) -> io::Result<ConsoleFlow> {
        let events = Arc::clone(self.registry.events());
        events.set_verbose(false);

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                self.writeln(&e.to_string()).await?;
                return Ok(ConsoleFlow::Continue);
            },
        };
        debug!(?command, "Console command");

        match command {
            Command::Help => {
                let usage = usage(self.registry.host());
                self.write(&usage).await?;
            },
            Command::Print => {
                events.set_verbose(true);
                self.writeln("[cmd] start print").await?;
            },
            Command::List => self.print_rules().await?,
            Command::Stats => self.print_stats().await?,
            Command::Add(rule) => match self.registry.add(rule).await {
                Ok(_) => self.print_rules().await?,
                Err(e) => self.writeln(&e.to_string()).await?,
            },
            Command::Delete(port) => match self.registry.remove(port).await {
                Ok(_) => self.print_rules().await?,
                Err(e) => self.writeln(&e.to_string()).await?,
            },
            Command::Quit => {
                self.registry.shutdown_all().await;
                return Ok(ConsoleFlow::Quit);
            },
        }

        Ok(ConsoleFlow::Continue)
    }

    async fn print_rules(&mut self) -> io::Result<()> {
        let mut text = String::new();
        for rule in self.registry.list().await {
            text.push_str(&format!("{rule}\n"));
        }
        self.write(&text).await
    }

    async fn print_stats(&mut self) -> io::Result<()> {
        let mut text = String::new();
        for (rule, stats) in self.registry.stats().await {
            text.push_str(&format!(
                "{rule} accepted={} failed={}\n",
                stats.accepted, stats.failed
            ));
        }
        let tracker = self.registry.tracker();
        text.push_str(&format!(
            "sessions={} total={}\n",
            tracker.active_sessions(),
            tracker.total_sessions()
        ));
        self.write(&text).await
    }

    async fn writeln(&mut self, line: &str) -> io::Result<()> {
        self.write(&format!("{line}\n")).await
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }
}

fn usage(host: &str) -> String {
    format!(
        "[cmd] Internal command usage
h       : stop output and print this usage (alias: empty line)
p       : start output
l       : list current relaying ports
s       : show listener and session counters
a <port>: add relaying port (<port> or <local>-<remote>)
d <port>: remove relaying port
q       : quit

Current destination host: {host}
"
    )
}
