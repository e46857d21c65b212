//! Listener for a single forwarding rule.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Rule;

use super::error::{RelayError, RelayResult};
use super::event::{EventLog, RelayEvent};
use super::session::{close_socket, Session};
use super::tracker::SessionTracker;

/// Pending-connection backlog of every listener.
pub const BACKLOG: u32 = 5;

/// Pause after a transient accept error before accepting again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a listener needs besides its rule.
#[derive(Debug)]
pub struct RelayContext {
    /// Destination host.
    pub host: String,

    /// Outbound dial timeout.
    pub connect_timeout: Duration,

    /// Event output.
    pub events: Arc<EventLog>,

    /// Connection task and session tracking.
    pub tracker: SessionTracker,
}

/// Statistics for a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Clients accepted.
    pub accepted: u64,

    /// Clients dropped because the destination could not be reached.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    failed: AtomicU64,
}

/// Result of dialing the destination.
#[derive(Debug)]
pub enum DialOutcome {
    /// The connection was established.
    Connected(TcpStream),

    /// The destination actively refused the connection.
    Refused,

    /// Any other failure, including the timeout.
    Failed(io::Error),
}

/// Dial `host:port`, giving up after `timeout`.
pub async fn dial(host: &str, port: u16, timeout: Duration) -> DialOutcome {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => DialOutcome::Connected(stream),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => DialOutcome::Refused,
        Ok(Err(e)) => DialOutcome::Failed(e),
        Err(_) => DialOutcome::Failed(io::Error::new(
            io::ErrorKind::TimedOut,
            "connect timed out",
        )),
    }
}

/// Bind a listening socket on all IPv4 interfaces.
fn bind(port: u16) -> RelayResult<TcpListener> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let bind_error = |source| RelayError::BindError { address, source };

    let socket = TcpSocket::new_v4().map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(address).map_err(bind_error)?;
    socket.listen(BACKLOG).map_err(bind_error)
}

/// A running listener for one rule.
///
/// Dropping a listener without calling [`Listener::shutdown`] still stops
/// its accept loop, but does not wait for the socket to be released. The
/// loop stays counted by the [`SessionTracker`] until it has exited, so
/// [`SessionTracker::wait_idle`] covers it either way.
#[derive(Debug)]
pub struct Listener {
    /// Rule served, with the actually bound listen port.
    rule: Rule,

    /// The bound address.
    local_addr: SocketAddr,

    /// Whether the accept loop is running.
    running: Arc<AtomicBool>,

    counters: Arc<Counters>,

    shutdown_tx: Option<oneshot::Sender<()>>,

    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind the rule's listen port and start accepting.
    ///
    /// A listen port of 0 binds an ephemeral port; [`Listener::rule`] then
    /// reports the port actually bound. Emits `[listen]` once bound.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::BindError`] if the port cannot be bound.
    pub fn start(rule: Rule, ctx: Arc<RelayContext>) -> RelayResult<Self> {
        let listener = bind(rule.listen_port)?;
        let local_addr = listener.local_addr()?;
        let rule = Rule::new(local_addr.port(), rule.remote_port);

        info!(address = %local_addr, rule = %rule, host = %ctx.host, "Listener bound");
        ctx.events.emit(&RelayEvent::Listen { rule });

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let loop_guard = ctx.tracker.task();
        let accept_loop = Self::accept_loop(
            listener,
            rule,
            ctx,
            Arc::clone(&running),
            Arc::clone(&counters),
            shutdown_rx,
        );
        let task = tokio::spawn(async move {
            accept_loop.await;
            drop(loop_guard);
        });

        Ok(Self {
            rule,
            local_addr,
            running,
            counters,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// The rule served.
    #[must_use]
    pub fn rule(&self) -> Rule {
        self.rule
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if the accept loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get listener statistics.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Ask the accept loop to stop. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the accept loop to exit and release the socket.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(rule = %self.rule, error = %e, "Accept loop task failed");
            }
        }
    }

    /// Stop and wait. When this returns the port is free again.
    ///
    /// Sessions already established are not affected.
    pub async fn shutdown(&mut self) {
        self.stop();
        self.join().await;
    }

    async fn accept_loop(
        listener: TcpListener,
        rule: Rule,
        ctx: Arc<RelayContext>,
        running: Arc<AtomicBool>,
        counters: Arc<Counters>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!(rule = %rule, "Accept loop started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        counters.accepted.fetch_add(1, Ordering::Relaxed);
                        debug!(peer = %peer, rule = %rule, "Accepted connection");

                        let guard = ctx.tracker.task();
                        let ctx = Arc::clone(&ctx);
                        let counters = Arc::clone(&counters);
                        tokio::spawn(async move {
                            Self::forward(stream, peer, rule, &ctx, &counters).await;
                            drop(guard);
                        });
                    },
                    Err(e) if is_fatal_accept_error(&e) => {
                        error!(rule = %rule, error = %e, "Fatal accept error");
                        break;
                    },
                    Err(e) => {
                        warn!(rule = %rule, error = %e, "Transient accept error");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    },
                },
            }
        }

        running.store(false, Ordering::Release);
        drop(listener);
        info!(rule = %rule, "Listener closed");
    }

    /// Dial the destination for one client and relay until both sides end.
    async fn forward(
        client: TcpStream,
        peer: SocketAddr,
        rule: Rule,
        ctx: &RelayContext,
        counters: &Counters,
    ) {
        let remote = match dial(&ctx.host, rule.remote_port, ctx.connect_timeout).await {
            DialOutcome::Connected(remote) => remote,
            DialOutcome::Refused => {
                debug!(peer = %peer, rule = %rule, "Dial refused");
                Self::reject(&client, peer, rule, ctx, counters);
                return;
            },
            DialOutcome::Failed(e) => {
                debug!(peer = %peer, rule = %rule, error = %e, "Dial failed");
                Self::reject(&client, peer, rule, ctx, counters);
                return;
            },
        };

        let session = match Session::new(client, remote) {
            Ok(session) => session,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Connection vanished before relaying");
                return;
            },
        };

        let Some(registration) = ctx.tracker.register(&session) else {
            debug!(peer = %peer, "Relay shutting down, dropping session");
            session.close();
            return;
        };

        ctx.events.emit(&session.info().opened_event());
        let report = session.run(Arc::clone(&ctx.events)).await;
        debug!(
            session = registration.id(),
            peer = %peer,
            bytes_up = report.bytes_up,
            bytes_down = report.bytes_down,
            "Session finished"
        );
    }

    /// Drop a client whose destination could not be reached.
    fn reject(
        client: &TcpStream,
        peer: SocketAddr,
        rule: Rule,
        ctx: &RelayContext,
        counters: &Counters,
    ) {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        ctx.events.emit(&RelayEvent::Failed {
            client: peer,
            host: ctx.host.clone(),
            remote_port: rule.remote_port,
        });
        close_socket(client);
    }
}

/// Check if an accept error is fatal (unrecoverable).
fn is_fatal_accept_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::NotFound
    )
}
