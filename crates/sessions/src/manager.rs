//! Session state machine.
//!
//! Sessions live in a map of per-session mutexes: mutations on one session
//! are serialized while different sessions proceed in parallel. A turn
//! index maps every assistant turn back to its owning session so that the
//! dispatcher and the cancel path can address turns by id alone.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use cp_domain::config::SessionsConfig;
use cp_domain::error::{Error, Result};
use cp_domain::ids::{SessionId, TurnId};
use cp_domain::prompt::Role;
use cp_domain::stream::Usage;
use cp_domain::trace::TraceEvent;

use crate::lifecycle::LifecycleManager;
use crate::store::SessionStore;
use crate::types::{Session, SessionStatus, Turn, TurnContent, TurnStatus};

/// Result of a successful [`SessionManager::append_user_turn`].
#[derive(Debug, Clone)]
pub struct TurnStart {
    pub session_id: SessionId,
    pub user_turn_id: TurnId,
    /// The pending assistant turn that the dispatcher will fill.
    pub turn_id: TurnId,
    /// The session as it stood before this append.
    pub prior: Session,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    turn_index: RwLock<HashMap<TurnId, SessionId>>,
    lifecycle: LifecycleManager,
    store: Option<SessionStore>,
}

impl SessionManager {
    /// Build the manager, loading the last snapshot when `state_path` is set.
    pub fn new(config: &SessionsConfig) -> Result<Self> {
        let store = match &config.state_path {
            Some(path) => Some(SessionStore::new(path)?),
            None => None,
        };

        let loaded = match &store {
            Some(s) => s.load()?,
            None => HashMap::new(),
        };

        let mut turn_index = HashMap::new();
        for session in loaded.values() {
            for turn in &session.turns {
                turn_index.insert(turn.id.clone(), session.id.clone());
            }
        }
        let sessions = loaded
            .into_iter()
            .map(|(id, s)| (id, Arc::new(Mutex::new(s))))
            .collect();

        Ok(Self {
            sessions: RwLock::new(sessions),
            turn_index: RwLock::new(turn_index),
            lifecycle: LifecycleManager::new(config),
            store,
        })
    }

    // ── Lookup ──────────────────────────────────────────────────────

    fn handle(&self, session_id: &SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn handle_for_turn(&self, turn_id: &TurnId) -> Result<Arc<Mutex<Session>>> {
        let session_id = self
            .session_for_turn(turn_id)
            .ok_or_else(|| Error::TurnNotFound(turn_id.to_string()))?;
        self.handle(&session_id)
    }

    /// Resolve a live session by id. Expired sessions are not resolvable.
    pub fn get(&self, session_id: &SessionId) -> Result<Session> {
        let session = self.handle(session_id)?.lock().clone();
        if session.status == SessionStatus::Expired {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        Ok(session)
    }

    /// Audit view: returns the session regardless of status.
    pub fn inspect(&self, session_id: &SessionId) -> Result<Session> {
        Ok(self.handle(session_id)?.lock().clone())
    }

    pub fn session_for_turn(&self, turn_id: &TurnId) -> Option<SessionId> {
        self.turn_index.read().get(turn_id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        let handles: Vec<_> = self.sessions.read().values().cloned().collect();
        handles.iter().map(|h| h.lock().clone()).collect()
    }

    // ── Mutations ───────────────────────────────────────────────────

    pub fn create_session(&self, principal: &str, workspace: &str) -> Session {
        let session = Session::new(principal, workspace);
        self.sessions
            .write()
            .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));

        TraceEvent::SessionCreated {
            session_id: session.id.to_string(),
            principal: principal.to_owned(),
            workspace: workspace.to_owned(),
        }
        .emit();

        session
    }

    /// Append a complete user turn followed by a pending assistant turn
    /// that `provider` will produce.
    ///
    /// Fails with `SessionClosed` unless the session is active, and with
    /// `TurnInFlight` while another turn is pending or streaming.
    pub fn append_user_turn(
        &self,
        session_id: &SessionId,
        content: TurnContent,
        token_count: u32,
        provider: &str,
    ) -> Result<TurnStart> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock();

        if !session.status.accepts_turns() {
            return Err(Error::SessionClosed {
                session_id: session_id.to_string(),
                status: session.status.as_str().into(),
            });
        }
        if session.in_flight().is_some() {
            return Err(Error::TurnInFlight {
                session_id: session_id.to_string(),
            });
        }

        let prior = session.clone();
        let now = Utc::now();

        let user = Turn {
            id: TurnId::new(),
            role: Role::User,
            content,
            provider: None,
            token_count,
            status: TurnStatus::Complete,
            created_at: now,
            finished_at: Some(now),
            error: None,
        };
        let assistant = Turn {
            id: TurnId::new(),
            role: Role::Assistant,
            content: TurnContent::default(),
            provider: Some(provider.to_owned()),
            token_count: 0,
            status: TurnStatus::Pending,
            created_at: now,
            finished_at: None,
            error: None,
        };
        let start = TurnStart {
            session_id: session_id.clone(),
            user_turn_id: user.id.clone(),
            turn_id: assistant.id.clone(),
            prior,
        };

        session.turns.push(user);
        session.turns.push(assistant);
        session.updated_at = now;

        {
            let mut index = self.turn_index.write();
            index.insert(start.user_turn_id.clone(), session_id.clone());
            index.insert(start.turn_id.clone(), session_id.clone());
        }

        TraceEvent::TurnStarted {
            session_id: session_id.to_string(),
            turn_id: start.turn_id.to_string(),
            provider: provider.to_owned(),
        }
        .emit();

        Ok(start)
    }

    /// Pending → streaming, on the first chunk from the provider.
    pub fn mark_streaming(&self, turn_id: &TurnId) -> Result<()> {
        let handle = self.handle_for_turn(turn_id)?;
        let mut session = handle.lock();
        let turn = session
            .turn_mut(turn_id)
            .ok_or_else(|| Error::TurnNotFound(turn_id.to_string()))?;

        match turn.status {
            TurnStatus::Pending => {
                turn.status = TurnStatus::Streaming;
                session.updated_at = Utc::now();
                Ok(())
            }
            TurnStatus::Streaming => Ok(()),
            status => Err(Error::TurnFinalized {
                turn_id: turn_id.to_string(),
                status: status.as_str().into(),
            }),
        }
    }

    /// The only path that persists an assistant turn as `complete`.
    pub fn complete_turn(
        &self,
        turn_id: &TurnId,
        content: TurnContent,
        usage: Usage,
    ) -> Result<Turn> {
        self.finish(turn_id, TurnStatus::Complete, |turn| {
            turn.content = content;
            turn.token_count = usage.completion_tokens;
        })
    }

    pub fn fail_turn(&self, turn_id: &TurnId, partial: TurnContent, reason: &str) -> Result<Turn> {
        self.finish(turn_id, TurnStatus::Failed, |turn| {
            turn.content = partial;
            turn.error = Some(reason.to_owned());
        })
    }

    /// Transition the in-flight turn to `cancelled`, freeing the session's
    /// in-flight slot.
    pub fn cancel_turn(&self, turn_id: &TurnId) -> Result<Turn> {
        self.finish(turn_id, TurnStatus::Cancelled, |_| {})
    }

    /// Move an in-flight turn to a terminal status. The first terminal
    /// transition wins; later ones get `TurnFinalized`.
    fn finish(
        &self,
        turn_id: &TurnId,
        status: TurnStatus,
        apply: impl FnOnce(&mut Turn),
    ) -> Result<Turn> {
        let handle = self.handle_for_turn(turn_id)?;
        let mut session = handle.lock();
        let now = Utc::now();

        let turn = session
            .turn_mut(turn_id)
            .ok_or_else(|| Error::TurnNotFound(turn_id.to_string()))?;
        if turn.status.is_terminal() {
            return Err(Error::TurnFinalized {
                turn_id: turn_id.to_string(),
                status: turn.status.as_str().into(),
            });
        }

        apply(turn);
        turn.status = status;
        turn.finished_at = Some(now);
        let finished = turn.clone();

        session.updated_at = now;
        if session.status == SessionStatus::Finalizing {
            session.status = SessionStatus::Closed;
        }

        TraceEvent::TurnFinished {
            session_id: session.id.to_string(),
            turn_id: turn_id.to_string(),
            status: status.as_str().into(),
            total_tokens: finished.token_count,
        }
        .emit();

        Ok(finished)
    }

    /// Close a session. With a turn in flight the session goes to
    /// `finalizing` and closes once that turn finishes. Closing a session
    /// that is already terminal is a no-op.
    pub fn close_session(&self, session_id: &SessionId) -> Result<SessionStatus> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock();

        if session.status == SessionStatus::Active {
            session.status = if session.in_flight().is_some() {
                SessionStatus::Finalizing
            } else {
                SessionStatus::Closed
            };
            session.updated_at = Utc::now();
            tracing::debug!(
                session_id = %session_id,
                status = session.status.as_str(),
                "session close requested"
            );
        }

        Ok(session.status)
    }

    /// Expire every active session idle past the configured timeout.
    pub fn expire_idle(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let handles: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut expired = Vec::new();

        for handle in handles {
            let mut session = handle.lock();
            if let Some(reason) = self.lifecycle.should_expire(&session, now) {
                session.status = SessionStatus::Expired;
                session.updated_at = now;
                tracing::info!(session_id = %session.id, reason = %reason, "session expired");
                TraceEvent::SessionExpired {
                    session_id: session.id.to_string(),
                    idle_minutes: self.lifecycle.idle_minutes().unwrap_or_default(),
                }
                .emit();
                expired.push(session.id.clone());
            }
        }

        expired
    }

    /// Write the snapshot, if a store is configured.
    pub fn flush(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.flush(&self.list()),
            None => Ok(()),
        }
    }
}
