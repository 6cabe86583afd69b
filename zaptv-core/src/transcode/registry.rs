//! Active-session registry: the single source of truth for slot ownership.
//!
//! Each logical slot (`streamId`, e.g. "primary"/"backup") maps to at most
//! one live session. Session ids are allocated from one global monotonic
//! counter so staleness is always decidable by comparing ids, never by slot
//! name alone. Every mutation is a single step under one lock, leaving no
//! interleaving gap in which two sessions could claim the same slot.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::process::Child;

/// One live transcode session: the child process plus its private output
/// directory, tagged with the slot it owns.
#[derive(Debug)]
pub struct ActiveSession {
    /// Globally monotonic process-instance identity
    pub session_id: u64,
    /// Logical slot this session occupies
    pub stream_id: String,
    /// Owned child process handle
    pub child: Child,
    /// Session-private segment directory, named by `session_id`
    pub segment_dir: PathBuf,
    /// Bounded tail of captured stderr for failure diagnostics
    pub stderr_tail: Arc<Mutex<String>>,
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    /// Snapshot of the captured stderr tail.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.lock().clone()
    }
}

/// Thread-safe registry of live sessions keyed by slot.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, ActiveSession>>,
    /// Ids of sessions whose spawn is still in flight. They own a directory
    /// already but are not installed yet, so sweeps must keep them.
    starting: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next globally monotonic session id.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reserves a session id ahead of its directory creation and spawn, so
    /// `active_ids` covers it before the session is installed.
    pub fn begin_start(&self, session_id: u64) {
        self.starting.lock().insert(session_id);
    }

    /// Releases a start reservation, once the session is installed or the
    /// start has failed.
    pub fn finish_start(&self, session_id: u64) {
        self.starting.lock().remove(&session_id);
    }

    /// Installs a session as the owner of its slot, returning the displaced
    /// predecessor (still alive, caller must kill it).
    pub fn install(&self, session: ActiveSession) -> Option<ActiveSession> {
        self.sessions
            .lock()
            .insert(session.stream_id.clone(), session)
    }

    /// Removes and returns the session for a slot, if any.
    pub fn take(&self, stream_id: &str) -> Option<ActiveSession> {
        self.sessions.lock().remove(stream_id)
    }

    /// Removes the slot's session only if it is still the given one.
    ///
    /// This is the "delete only if still mine" step used by failure and
    /// timeout paths; a session that was already superseded must not tear
    /// down its replacement.
    pub fn take_if_current(&self, stream_id: &str, session_id: u64) -> Option<ActiveSession> {
        let mut sessions = self.sessions.lock();
        if sessions.get(stream_id).map(|s| s.session_id) == Some(session_id) {
            sessions.remove(stream_id)
        } else {
            None
        }
    }

    /// Drains every session from the registry.
    pub fn take_all(&self) -> Vec<ActiveSession> {
        self.sessions.lock().drain().map(|(_, s)| s).collect()
    }

    /// The session id currently owning a slot.
    pub fn current_id(&self, stream_id: &str) -> Option<u64> {
        self.sessions.lock().get(stream_id).map(|s| s.session_id)
    }

    /// True while the given session still owns its slot.
    pub fn is_current(&self, stream_id: &str, session_id: u64) -> bool {
        self.current_id(stream_id) == Some(session_id)
    }

    /// Live set of active session ids, read fresh for sweep keep-sets.
    /// Includes reserved ids whose start is still in flight.
    pub fn active_ids(&self) -> HashSet<u64> {
        let mut ids: HashSet<u64> = self.sessions.lock().values().map(|s| s.session_id).collect();
        ids.extend(self.starting.lock().iter().copied());
        ids
    }

    /// Polls the child of the given session for exit without blocking.
    ///
    /// Returns `None` if the session no longer owns its slot.
    pub fn try_wait(&self, stream_id: &str, session_id: u64) -> Option<Option<ExitStatus>> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(stream_id)?;
        if session.session_id != session_id {
            return None;
        }
        session.child.try_wait().ok()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
