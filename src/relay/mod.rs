//! TCP relay engine.
//!
//! A [`ListenerRegistry`] owns one [`Listener`] per forwarding rule. Each
//! listener accepts clients on its port, dials the destination host, and
//! hands both sockets to a [`Session`], which pumps bytes in both directions
//! on two tasks until either side ends.
//!
//! Removing a rule closes its listening socket but leaves sessions already
//! established on it running. [`ListenerRegistry::shutdown_all`] stops
//! everything.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nano_tcp_relay::config::{RelayConfig, Rule};
//! use nano_tcp_relay::relay::{EventLog, ListenerRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::new("10.0.0.5");
//! let events = Arc::new(EventLog::stdout(true)?);
//! let registry = ListenerRegistry::new(&config, Arc::clone(&events));
//!
//! registry.add(Rule::new(2222, 22)).await?;
//! registry.remove(2222).await?;
//! registry.shutdown_all().await;
//! events.close();
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod listener;
mod registry;
mod session;
mod tracker;

pub use error::{RelayError, RelayResult};
pub use event::{EventLog, EventSink, Flow, MemorySink, RelayEvent, WriterSink};
pub use listener::{dial, DialOutcome, Listener, ListenerStats, RelayContext, BACKLOG};
pub use registry::ListenerRegistry;
pub use session::{
    close_socket, PumpEnd, PumpReport, Session, SessionHandles, SessionInfo, SessionReport,
    CHUNK_SIZE,
};
pub use tracker::{SessionGuard, SessionTracker, TaskGuard};
