//! Registry of active forwarding rules.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::error::{RelayError, RelayResult};
use super::event::EventLog;
use super::listener::{Listener, ListenerStats, RelayContext};
use super::tracker::SessionTracker;
use crate::config::{is_loopback_host, RelayConfig, Rule};

#[derive(Debug, Default)]
struct RegistryState {
    /// Running listeners, in the order they were added.
    listeners: Vec<Listener>,

    /// Set by [`ListenerRegistry::shutdown_all`].
    closed: bool,
}

/// The set of forwarding rules currently served.
///
/// At most one listener exists per listen port. All mutations are
/// serialized, so an `add` and a `remove` for the same port never
/// interleave.
#[derive(Debug)]
pub struct ListenerRegistry {
    ctx: Arc<RelayContext>,
    state: Mutex<RegistryState>,
}

impl ListenerRegistry {
    /// Create an empty registry forwarding to `config.host`.
    ///
    /// `config.rules` is not started; call [`ListenerRegistry::add`] for
    /// each rule.
    #[must_use]
    pub fn new(config: &RelayConfig, events: Arc<EventLog>) -> Self {
        Self {
            ctx: Arc::new(RelayContext {
                host: config.host.clone(),
                connect_timeout: config.settings.connect_timeout(),
                events,
                tracker: SessionTracker::new(),
            }),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Destination host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.ctx.host
    }

    /// Event output shared by every listener.
    #[must_use]
    pub fn events(&self) -> &Arc<EventLog> {
        &self.ctx.events
    }

    /// Session tracker shared by every listener.
    #[must_use]
    pub fn tracker(&self) -> &SessionTracker {
        &self.ctx.tracker
    }

    /// Start forwarding a rule.
    ///
    /// A listen port of 0 binds an ephemeral port. Returns the rule as
    /// bound.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidPort`] if the remote port is 0
    /// - [`RelayError::SelfForward`] if the host is loopback and both ports match
    /// - [`RelayError::AlreadyExists`] if the listen port is already forwarded
    /// - [`RelayError::BindError`] if the port cannot be bound
    /// - [`RelayError::ShuttingDown`] after [`ListenerRegistry::shutdown_all`]
    pub async fn add(&self, rule: Rule) -> RelayResult<Rule> {
        if rule.remote_port == 0 {
            return Err(RelayError::InvalidPort {
                port: rule.remote_port,
            });
        }
        if rule.is_symmetric() && is_loopback_host(&self.ctx.host) {
            return Err(RelayError::SelfForward {
                host: self.ctx.host.clone(),
                port: rule.listen_port,
            });
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(RelayError::ShuttingDown);
        }
        if rule.listen_port != 0
            && state
                .listeners
                .iter()
                .any(|l| l.rule().listen_port == rule.listen_port)
        {
            return Err(RelayError::AlreadyExists {
                port: rule.listen_port,
            });
        }

        let listener = Listener::start(rule, Arc::clone(&self.ctx))?;
        let bound = listener.rule();
        state.listeners.push(listener);

        info!(rule = %bound, "Forwarding rule added");
        Ok(bound)
    }

    /// Stop forwarding a listen port.
    ///
    /// When this returns the port is no longer accepting. Sessions already
    /// established on it keep running until either side closes.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] if the port is not forwarded.
    pub async fn remove(&self, listen_port: u16) -> RelayResult<Rule> {
        let mut state = self.state.lock().await;
        let index = state
            .listeners
            .iter()
            .position(|l| l.rule().listen_port == listen_port)
            .ok_or(RelayError::NotFound { port: listen_port })?;

        let mut listener = state.listeners.remove(index);
        listener.shutdown().await;

        info!(rule = %listener.rule(), "Forwarding rule removed");
        Ok(listener.rule())
    }

    /// Rules currently forwarded, in the order they were added.
    pub async fn list(&self) -> Vec<Rule> {
        let state = self.state.lock().await;
        state.listeners.iter().map(Listener::rule).collect()
    }

    /// Per-rule counters, in the order the rules were added.
    pub async fn stats(&self) -> Vec<(Rule, ListenerStats)> {
        let state = self.state.lock().await;
        state
            .listeners
            .iter()
            .map(|l| (l.rule(), l.stats()))
            .collect()
    }

    /// Stop every listener, close every session, and wait for all
    /// connection tasks to finish.
    ///
    /// Safe to call more than once. Later [`ListenerRegistry::add`] calls
    /// fail with [`RelayError::ShuttingDown`].
    pub async fn shutdown_all(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;

        for listener in &mut state.listeners {
            listener.stop();
        }
        for listener in &mut state.listeners {
            listener.join().await;
        }
        let stopped = state.listeners.len();
        state.listeners.clear();
        drop(state);

        debug!(listeners = stopped, "Listeners stopped");
        self.ctx.tracker.close_all();
        self.ctx.tracker.wait_idle().await;
        info!("Relay stopped");
    }
}
