//! Live connection bookkeeping.
//!
//! The registry is the single source of truth for who is reachable. Ids are
//! handed out here and never reused. Register, unregister and snapshot take
//! one lock, which is never held across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::ws::Message;
use tokio::sync::{mpsc, Notify};

/// Registry-assigned connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            2 => ConnState::Closing,
            _ => ConnState::Closed,
        }
    }
}

struct Shared {
    state: AtomicU8,
    close: Notify,
}

/// Handle to one live client: outbound queue sender plus lifecycle state.
///
/// Cloning is cheap; the socket itself stays with the session task that
/// drains the queue.
#[derive(Clone)]
pub struct Connection {
    id: ConnId,
    tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<Message> {
        &self.tx
    }

    /// Resolves once the core asked this connection to close.
    pub async fn close_requested(&self) {
        self.shared.close.notified().await;
    }

    fn transition(&self, from: ConnState, to: ConnState) -> bool {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// OPEN -> CLOSING and wake the session task. False if already past OPEN.
    fn begin_close(&self) -> bool {
        if self.transition(ConnState::Open, ConnState::Closing) {
            // notify_one keeps a permit if the task is not parked yet
            self.shared.close.notify_one();
            true
        } else {
            false
        }
    }

    fn mark_closed(&self) {
        self.shared.state.store(ConnState::Closed as u8, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Result of `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Admission {
    Registered,
    /// Id already present; nothing changed.
    Duplicate,
    /// Connection limit reached.
    AtCapacity,
    /// `close_all` already ran.
    Closed,
    /// Connection was not in CONNECTING.
    NotConnecting,
}

#[derive(Default)]
struct Live {
    conns: HashMap<ConnId, Connection>,
    closed: bool,
}

pub struct ConnectionRegistry {
    live: RwLock<Live>,
    seq: AtomicU64,
    max: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Registry admitting at most `max` live connections (0 = unlimited).
    pub fn with_limit(max: usize) -> Self {
        Self {
            live: RwLock::new(Live::default()),
            seq: AtomicU64::new(1),
            max,
        }
    }

    /// Create a CONNECTING connection with a fresh id.
    pub fn allocate(&self, tx: mpsc::Sender<Message>) -> Connection {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        Connection {
            id: ConnId(n),
            tx,
            shared: Arc::new(Shared {
                state: AtomicU8::new(ConnState::Connecting as u8),
                close: Notify::new(),
            }),
        }
    }

    /// Insert as OPEN. The limit and the closed flag are checked under the
    /// same write lock as the insert.
    pub fn register(&self, conn: Connection) -> Admission {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        if live.conns.contains_key(&conn.id) {
            tracing::error!(conn = %conn.id, "registry inconsistency: duplicate connection id");
            return Admission::Duplicate;
        }
        if live.closed {
            conn.mark_closed();
            return Admission::Closed;
        }
        if self.max > 0 && live.conns.len() >= self.max {
            conn.mark_closed();
            return Admission::AtCapacity;
        }
        if !conn.transition(ConnState::Connecting, ConnState::Open) {
            tracing::warn!(conn = %conn.id, state = ?conn.state(), "register skipped: connection not connecting");
            return Admission::NotConnecting;
        }
        live.conns.insert(conn.id, conn);
        Admission::Registered
    }

    /// Remove and mark CLOSED. Idempotent; returns whether an entry was removed.
    pub fn unregister(&self, id: ConnId) -> bool {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        match live.conns.remove(&id) {
            Some(conn) => {
                conn.mark_closed();
                true
            }
            None => false,
        }
    }

    /// Close trigger raised inside the core (failed send, shutdown).
    pub fn close(&self, id: ConnId) -> bool {
        let conn = {
            let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
            live.conns.get(&id).cloned()
        };
        let Some(conn) = conn else { return false };
        conn.begin_close();
        self.unregister(id)
    }

    /// Point-in-time copy of the live set.
    pub fn snapshot(&self) -> Vec<Connection> {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        live.conns.values().cloned().collect()
    }

    /// Close every live connection, clear the registry and refuse any later
    /// `register`.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Connection> = {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            live.closed = true;
            live.conns.drain().map(|(_, c)| c).collect()
        };
        for conn in &drained {
            conn.begin_close();
            conn.mark_closed();
        }
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.live.read().unwrap_or_else(PoisonError::into_inner).closed
    }

    pub fn contains(&self, id: ConnId) -> bool {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        live.conns.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.read().unwrap_or_else(PoisonError::into_inner).conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Close observer installed once per accepted connection.
///
/// Dropping it unregisters the connection, so every exit path of the session
/// task (clean close, error, panic unwind) releases the registry entry.
pub struct CloseObserver {
    registry: Arc<ConnectionRegistry>,
    id: ConnId,
}

impl CloseObserver {
    pub fn new(registry: Arc<ConnectionRegistry>, id: ConnId) -> Self {
        Self { registry, id }
    }
}

impl Drop for CloseObserver {
    fn drop(&mut self) {
        if self.registry.unregister(self.id) {
            tracing::debug!(conn = %self.id, "connection unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn open(reg: &ConnectionRegistry) -> (Connection, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        let conn = reg.allocate(tx);
        assert_eq!(reg.register(conn.clone()), Admission::Registered);
        (conn, rx)
    }

    #[test]
    fn register_moves_connecting_to_open() {
        let reg = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let conn = reg.allocate(tx);
        assert_eq!(conn.state(), ConnState::Connecting);
        assert_eq!(reg.register(conn.clone()), Admission::Registered);
        assert_eq!(conn.state(), ConnState::Open);
        assert!(reg.contains(conn.id()));
    }

    #[test]
    fn duplicate_register_is_noop() {
        let reg = ConnectionRegistry::new();
        let (conn, _rx) = open(&reg);
        assert_eq!(reg.register(conn.clone()), Admission::Duplicate);
        assert_eq!(reg.len(), 1);
        assert_eq!(conn.state(), ConnState::Open);
    }

    #[test]
    fn unregister_twice_is_noop() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = open(&reg);
        let (b, _rb) = open(&reg);
        assert!(reg.unregister(a.id()));
        assert!(!reg.unregister(a.id()));
        assert_eq!(a.state(), ConnState::Closed);
        assert_eq!(reg.len(), 1);
        assert!(reg.contains(b.id()));
    }

    #[test]
    fn ids_are_never_reused() {
        let reg = ConnectionRegistry::default();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let (c, _rx) = open(&reg);
            assert!(seen.insert(c.id()));
            reg.unregister(c.id());
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn live_set_matches_open_connections() {
        let reg = ConnectionRegistry::new();
        let conns: Vec<_> = (0..10).map(|_| open(&reg)).collect();
        for (i, (c, _)) in conns.iter().enumerate() {
            if i % 3 == 0 {
                reg.unregister(c.id());
            }
            if i % 4 == 0 {
                reg.close(c.id());
            }
        }
        let live: HashSet<ConnId> = reg.snapshot().iter().map(Connection::id).collect();
        let open_ids: HashSet<ConnId> = conns
            .iter()
            .filter(|(c, _)| c.state() == ConnState::Open)
            .map(|(c, _)| c.id())
            .collect();
        assert_eq!(live, open_ids);
    }

    #[test]
    fn snapshot_is_decoupled_from_later_mutation() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = open(&reg);
        let snap = reg.snapshot();
        let (_b, _rb) = open(&reg);
        reg.unregister(a.id());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id(), a.id());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn closed_connection_cannot_be_registered_again() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = open(&reg);
        reg.unregister(a.id());
        assert_eq!(reg.register(a.clone()), Admission::NotConnecting);
        assert!(!reg.contains(a.id()));
    }

    #[tokio::test]
    async fn close_wakes_the_session_task() {
        let reg = ConnectionRegistry::new();
        let (a, _ra) = open(&reg);
        assert!(reg.close(a.id()));
        assert!(!reg.close(a.id()));
        // permit was stored before anyone waited
        tokio::time::timeout(std::time::Duration::from_secs(1), a.close_requested())
            .await
            .expect("close signal");
        assert_eq!(a.state(), ConnState::Closed);
    }

    #[test]
    fn close_all_clears_everything() {
        let reg = Arc::new(ConnectionRegistry::new());
        let conns: Vec<_> = (0..5).map(|_| open(&reg)).collect();
        assert_eq!(reg.close_all(), 5);
        assert!(reg.is_empty());
        assert!(conns.iter().all(|(c, _)| c.state() == ConnState::Closed));
        assert_eq!(reg.close_all(), 0);
    }

    #[test]
    fn register_after_close_all_is_refused() {
        let reg = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        // allocated before teardown, registered after it
        let late = reg.allocate(tx);
        assert_eq!(reg.close_all(), 0);
        assert!(reg.is_closed());
        assert_eq!(reg.register(late.clone()), Admission::Closed);
        assert!(reg.is_empty());
        assert_eq!(late.state(), ConnState::Closed);
    }

    #[test]
    fn limit_is_enforced_at_register() {
        let reg = ConnectionRegistry::with_limit(2);
        let (a, _ra) = open(&reg);
        let (_b, _rb) = open(&reg);
        let (tx, _rc) = mpsc::channel(1);
        let c = reg.allocate(tx);
        assert_eq!(reg.register(c.clone()), Admission::AtCapacity);
        assert_eq!(c.state(), ConnState::Closed);
        assert_eq!(reg.len(), 2);

        reg.unregister(a.id());
        let (tx, _rd) = mpsc::channel(1);
        assert_eq!(reg.register(reg.allocate(tx)), Admission::Registered);
    }

    #[test]
    fn limit_holds_under_concurrent_registration() {
        let reg = Arc::new(ConnectionRegistry::with_limit(8));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let (tx, rx) = mpsc::channel(1);
                    let admitted = reg.register(reg.allocate(tx)) == Admission::Registered;
                    (admitted, rx)
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|(ok, _)| *ok)
            .count();
        assert_eq!(admitted, 8);
        assert_eq!(reg.len(), 8);
    }

    #[test]
    fn observer_unregisters_exactly_once_on_drop() {
        let reg = Arc::new(ConnectionRegistry::new());
        let (a, _ra) = open(&reg);
        let observer = CloseObserver::new(Arc::clone(&reg), a.id());
        reg.unregister(a.id());
        drop(observer);
        assert!(reg.is_empty());
        assert_eq!(a.state(), ConnState::Closed);
    }
}
