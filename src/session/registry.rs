//! Shared registry of live sessions and the chat history.
//!
//! Every mutation and every broadcast goes through one `tokio::sync::Mutex`,
//! so the set of recipients cannot change while a line is being delivered.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// Reference-counted byte buffer: one allocation per line, shared by history and every peer write.
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time;

use crate::logger::{Journal, Logger};
use crate::session::protocol::{self, DEFAULT_NAME};

/// How long one peer write may take unless `with_write_timeout` says otherwise
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Write half of a client connection
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write half shared between the session task (prompts, replay) and broadcasts
pub type SharedWriter = Arc<Mutex<SessionWriter>>;

/// Registry-assigned identity of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Returned by `try_register` when every slot is taken
#[derive(Debug, Error, PartialEq, Eq)]
#[error("registry is full ({capacity} sessions)")]
pub struct RegistryFull {
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Holds a slot but receives no broadcasts yet
    Negotiating,
    Active,
    /// Joined, but a write timed out; broadcasts skip it from then on
    Stalled,
}

impl Phase {
    fn joined(self) -> bool {
        self != Phase::Negotiating
    }
}

struct SessionEntry {
    addr: SocketAddr,
    name: String,
    writer: SharedWriter,
    phase: Phase,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    history: VecDeque<Bytes>,
}

pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
    capacity: usize,
    history_limit: Option<usize>,
    write_timeout: Duration,
    journal: Arc<dyn Journal>,
    logger: Logger,
}

impl SessionRegistry {
    pub fn new(
        capacity: usize,
        history_limit: Option<usize>,
        journal: Arc<dyn Journal>,
        logger: Logger,
    ) -> Self {
        SessionRegistry {
            state: Mutex::new(RegistryState::default()),
            next_id: AtomicU64::new(1),
            capacity,
            history_limit,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            journal,
            logger,
        }
    }

    /// Bounds every peer write, including the wait for that peer's writer.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    /// Claims a slot for a new connection, checking capacity and inserting
    /// under the same lock. The session starts as `Anonymous` and does not
    /// receive broadcasts until `activate`.
    pub async fn try_register(
        &self,
        addr: SocketAddr,
        writer: SharedWriter,
    ) -> Result<SessionId, RegistryFull> {
        let mut state = self.state.lock().await;
        if state.sessions.len() >= self.capacity {
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        state.sessions.insert(
            id,
            SessionEntry {
                addr,
                name: DEFAULT_NAME.to_string(),
                writer,
                phase: Phase::Negotiating,
            },
        );
        Ok(id)
    }

    /// Sets the display name, returning the previous one.
    pub async fn rename(&self, id: SessionId, name: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state
            .sessions
            .get_mut(&id)
            .map(|entry| std::mem::replace(&mut entry.name, name.to_string()))
    }

    pub async fn name(&self, id: SessionId) -> Option<String> {
        let state = self.state.lock().await;
        state.sessions.get(&id).map(|entry| entry.name.clone())
    }

    /// Replays the whole history to the session and makes it a broadcast
    /// recipient, in one critical section: every history line reaches it
    /// exactly once, either here or live. Returns the number of lines replayed.
    pub async fn activate(&self, id: SessionId) -> io::Result<usize> {
        let mut state = self.state.lock().await;
        let writer = match state.sessions.get(&id) {
            Some(entry) => entry.writer.clone(),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("session {} is not registered", id),
                ));
            }
        };

        self.deliver(&writer, state.history.iter()).await?;

        if let Some(entry) = state.sessions.get_mut(&id) {
            entry.phase = Phase::Active;
        }
        Ok(state.history.len())
    }

    /// Records `line` in history, writes it to every active session, then
    /// appends it to the journal.
    pub async fn broadcast(&self, line: &str) {
        let mut state = self.state.lock().await;
        self.broadcast_locked(&mut state, line).await;
    }

    /// Removes the session and, if it had joined, announces
    /// `<name> left the chat` to everyone still registered (itself included).
    /// Only the first call for an id does anything; it returns the last name.
    pub async fn depart(&self, id: SessionId) -> Option<String> {
        let mut state = self.state.lock().await;
        let (name, phase) = match state.sessions.get(&id) {
            Some(entry) => (entry.name.clone(), entry.phase),
            None => return None,
        };
        if phase.joined() {
            let notice = protocol::left_notice(&self.journal.format_timestamp(), &name);
            self.broadcast_locked(&mut state, &notice).await;
        }
        state.sessions.remove(&id);
        Some(name)
    }

    /// Removes the session without any notice. Returns whether it was present.
    pub async fn unregister(&self, id: SessionId) -> bool {
        let mut state = self.state.lock().await;
        state.sessions.remove(&id).is_some()
    }

    /// Number of registered sessions, joined or still negotiating
    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Copy of the history, oldest first
    pub async fn history(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Names of joined sessions, sorted
    pub async fn names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .sessions
            .values()
            .filter(|entry| entry.phase.joined())
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }

    async fn broadcast_locked(&self, state: &mut RegistryState, line: &str) {
        let payload = Bytes::from(protocol::ensure_trailing_newline(line).into_owned());

        state.history.push_back(payload.clone());
        if let Some(limit) = self.history_limit {
            while state.history.len() > limit {
                state.history.pop_front();
            }
        }

        for entry in state.sessions.values_mut() {
            if entry.phase != Phase::Active {
                continue;
            }
            let sent = self.deliver(&entry.writer, std::iter::once(&payload)).await;
            match sent {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    self.logger.warn(&format!(
                        "⏳ {} ({}) is not reading, no more broadcasts to it: {}",
                        entry.addr, entry.name, e
                    ));
                    entry.phase = Phase::Stalled;
                }
                Err(e) => {
                    self.logger.warn(&format!(
                        "Error writing to {} ({}): {}",
                        entry.addr, entry.name, e
                    ));
                }
            }
        }

        self.journal.append_log(&String::from_utf8_lossy(&payload));
    }

    /// Writes `lines` to one peer and flushes. A peer that does not take the
    /// bytes within `write_timeout` gets `TimedOut`, so the registry lock is
    /// never held longer than that per peer.
    async fn deliver<'a, I>(&self, writer: &SharedWriter, lines: I) -> io::Result<()>
    where
        I: IntoIterator<Item = &'a Bytes>,
    {
        let write = async {
            let mut w = writer.lock().await;
            for line in lines {
                w.write_all(line).await?;
            }
            w.flush().await
        };
        match time::timeout(self.write_timeout, write).await {
            Ok(sent) => sent,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("write not accepted within {:?}", self.write_timeout),
            )),
        }
    }
}
