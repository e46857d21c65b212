//! Tracking of in-flight connection tasks and live sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use super::session::{Session, SessionHandles};

/// Session tracker shared by every listener of a registry.
///
/// Counts relay tasks (accept loops, and connections from accept until
/// their session ends) and keeps the socket handles of every live session
/// so that shutdown can close them.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    /// Live sessions by ID.
    sessions: Mutex<HashMap<u64, SessionHandles>>,

    /// Set once by [`SessionTracker::close_all`]; no session registers after.
    closed: AtomicBool,

    /// Number of running relay tasks.
    tasks: watch::Sender<usize>,

    /// Next session ID.
    next_id: AtomicU64,

    /// Sessions registered since creation.
    total: AtomicU64,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    /// Create a new session tracker.
    #[must_use]
    pub fn new() -> Self {
        let (tasks, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackerInner {
                sessions: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                tasks,
                next_id: AtomicU64::new(1),
                total: AtomicU64::new(0),
            }),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, SessionHandles>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a relay task until the returned guard is dropped.
    #[must_use]
    pub fn task(&self) -> TaskGuard {
        self.inner.tasks.send_modify(|n| *n += 1);
        TaskGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Track a session until the returned guard is dropped.
    ///
    /// Returns `None` once [`SessionTracker::close_all`] has run; the caller
    /// must then close the session itself.
    #[must_use]
    pub fn register(&self, session: &Session) -> Option<SessionGuard> {
        let mut sessions = self.sessions();
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(id, session.handles());
        self.inner.total.fetch_add(1, Ordering::Relaxed);

        Some(SessionGuard {
            id,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Close every live session and refuse new registrations.
    pub fn close_all(&self) {
        let sessions = self.sessions();
        self.inner.closed.store(true, Ordering::Release);

        debug!(count = sessions.len(), "Closing live sessions");
        for handles in sessions.values() {
            handles.close();
        }
    }

    /// Wait until no relay task is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.tasks.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Number of running relay tasks: accept loops plus connections,
    /// including those still dialing.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        *self.inner.tasks.borrow()
    }

    /// Sessions registered since creation.
    #[must_use]
    pub fn total_sessions(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }
}

/// Keeps a relay task counted.
#[derive(Debug)]
pub struct TaskGuard {
    inner: Arc<TrackerInner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.inner.tasks.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Keeps a session registered.
#[derive(Debug)]
pub struct SessionGuard {
    id: u64,
    inner: Arc<TrackerInner>,
}

impl SessionGuard {
    /// Session ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
