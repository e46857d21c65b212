//! Operator-facing relay events.
//!
//! Every listener and pump reports what it does as a [`RelayEvent`]. The
//! rendered lines use fixed prefixes (`[listen]`, `[opened]`, `[failed]`,
//! `[data  ]`, `[closed]`) so that they can be scraped from the console.

use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use crate::config::Rule;

/// One direction of a relayed connection, as seen by its pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    /// Peer the pump reads from.
    pub src_peer: SocketAddr,

    /// Local port of the socket the pump reads from.
    pub src_local_port: u16,

    /// Local port of the socket the pump writes to.
    pub dst_local_port: u16,

    /// Peer the pump writes to.
    pub dst_peer: SocketAddr,
}

impl Flow {
    /// The same connection pair seen from the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            src_peer: self.dst_peer,
            src_local_port: self.dst_local_port,
            dst_local_port: self.src_local_port,
            dst_peer: self.src_peer,
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} --{}--{}--> {}",
            self.src_peer, self.src_local_port, self.dst_local_port, self.dst_peer
        )
    }
}

/// Something the relay did that the operator may want to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A listener was bound.
    Listen {
        /// The rule the listener serves.
        rule: Rule,
    },

    /// A client was accepted and its outbound connection established.
    Opened {
        /// Client address.
        client: SocketAddr,
        /// Local port the client connected to.
        listen_port: u16,
        /// Local port of the outbound connection.
        outgoing_port: u16,
        /// Remote address of the outbound connection.
        remote: SocketAddr,
    },

    /// A client was accepted but the destination could not be reached.
    Failed {
        /// Client address.
        client: SocketAddr,
        /// Destination host as configured.
        host: String,
        /// Destination port.
        remote_port: u16,
    },

    /// A chunk was forwarded.
    Data {
        /// Direction of the chunk.
        flow: Flow,
        /// Number of bytes forwarded.
        count: usize,
    },

    /// A pump finished.
    Closed {
        /// Direction the pump served.
        flow: Flow,
    },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen { rule } => {
                write!(f, "[listen] {} (--> {})", rule.listen_port, rule.remote_port)
            },
            Self::Opened {
                client,
                listen_port,
                outgoing_port,
                remote,
            } => write!(
                f,
                "[opened] {client} <--{listen_port}--{outgoing_port}--> {remote}"
            ),
            Self::Failed {
                client,
                host,
                remote_port,
            } => write!(f, "[failed] {client} --> {host}:{remote_port}"),
            Self::Data { flow, count } => write!(f, "[data  ] {flow} ({count})"),
            Self::Closed { flow } => write!(f, "[closed] {flow}"),
        }
    }
}

/// Destination for rendered event lines.
pub trait EventSink: Send + Sync {
    /// Write one line (without trailing newline).
    ///
    /// Called from relay tasks, so it must not block.
    fn write_line(&self, line: &str);

    /// Flush pending lines and stop accepting new ones.
    fn close(&self) {}
}

/// Lines queued between relay tasks and the output thread.
const LINE_QUEUE: usize = 1024;

/// Writes event lines to an [`io::Write`] on a dedicated OS thread.
///
/// Lines are queued without blocking. If the writer falls more than
/// 1024 lines behind, new lines are dropped until it catches up.
pub struct WriterSink {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WriterSink {
    /// Start the output thread for `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<W>(mut writer: W) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(LINE_QUEUE);

        let thread = thread::Builder::new()
            .name("event-output".to_string())
            .spawn(move || {
                while let Some(line) = rx.blocking_recv() {
                    if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
                        warn!(error = %e, "Failed to write event output");
                        break;
                    }
                }
                debug!("Event output writer finished");
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Start the output thread for standard output.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn stdout() -> io::Result<Self> {
        Self::spawn(io::stdout())
    }
}

impl EventSink for WriterSink {
    fn write_line(&self, line: &str) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = tx.as_ref() {
            if let Err(TrySendError::Full(_)) = tx.try_send(line.to_string()) {
                debug!("Event output is behind, line dropped");
            }
        }
    }

    fn close(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("Event output thread panicked");
            }
        }
    }
}

impl Drop for WriterSink {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for WriterSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterSink").finish_non_exhaustive()
    }
}

/// Keeps event lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines starting with the given prefix, e.g. `"[opened]"`.
    #[must_use]
    pub fn lines_with(&self, prefix: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }
}

impl EventSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}

/// Event output with an on/off switch.
///
/// The switch only gates the operator sink; every event is also traced at
/// TRACE level.
pub struct EventLog {
    verbose: AtomicBool,
    sink: Arc<dyn EventSink>,
}

impl EventLog {
    /// Create an event log writing to `sink`.
    pub fn new(sink: Arc<dyn EventSink>, verbose: bool) -> Self {
        Self {
            verbose: AtomicBool::new(verbose),
            sink,
        }
    }

    /// Create an event log writing to standard output from its own thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the output thread cannot be spawned.
    pub fn stdout(verbose: bool) -> io::Result<Self> {
        Ok(Self::new(Arc::new(WriterSink::stdout()?), verbose))
    }

    /// Turn operator output on or off.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Whether operator output is on.
    #[must_use]
    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Report an event.
    pub fn emit(&self, event: &RelayEvent) {
        trace!(target: "nano_tcp_relay::event", "{event}");
        if self.is_verbose() {
            self.sink.write_line(&event.to_string());
        }
    }

    /// Write out queued lines and close the sink.
    pub fn close(&self) {
        self.sink.close();
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("verbose", &self.is_verbose())
            .finish_non_exhaustive()
    }
}
