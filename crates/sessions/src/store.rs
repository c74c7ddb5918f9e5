//! Snapshot persistence for sessions.
//!
//! Writes every known session (including expired ones, which stay
//! inspectable for audit) to `sessions.json` under the configured state
//! path. Turns that were in flight when the snapshot was taken come back
//! as `failed`: no dispatcher survives a restart to finish them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use cp_domain::error::{Error, Result};
use cp_domain::ids::SessionId;

use crate::types::{Session, TurnStatus};

/// File-backed session snapshot store.
pub struct SessionStore {
    sessions_path: PathBuf,
}

impl SessionStore {
    /// Open (creating the directory if needed) the store at
    /// `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        Ok(Self {
            sessions_path: dir.join("sessions.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.sessions_path
    }

    /// Load the last snapshot. A missing file yields an empty map; a corrupt
    /// one is logged and treated as empty.
    pub fn load(&self) -> Result<HashMap<SessionId, Session>> {
        if !self.sessions_path.exists() {
            return Ok(HashMap::new());
        }

        let raw = std::fs::read_to_string(&self.sessions_path).map_err(Error::Io)?;
        let mut sessions: HashMap<SessionId, Session> = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    path = %self.sessions_path.display(),
                    error = %e,
                    "session snapshot unreadable, starting empty"
                );
                HashMap::new()
            }
        };

        let now = Utc::now();
        for session in sessions.values_mut() {
            for turn in session.turns.iter_mut().filter(|t| t.status.is_in_flight()) {
                turn.status = TurnStatus::Failed;
                turn.finished_at = Some(now);
                turn.error = Some("interrupted by restart".into());
            }
        }

        tracing::info!(
            sessions = sessions.len(),
            path = %self.sessions_path.display(),
            "session store loaded"
        );

        Ok(sessions)
    }

    /// Persist the given sessions, replacing the previous snapshot.
    pub fn flush(&self, sessions: &[Session]) -> Result<()> {
        let map: HashMap<&SessionId, &Session> = sessions.iter().map(|s| (&s.id, s)).collect();
        let json = serde_json::to_string_pretty(&map)
            .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?;

        // Write-then-rename so a crash mid-write leaves the old snapshot.
        let tmp = self.sessions_path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.sessions_path).map_err(Error::Io)?;
        Ok(())
    }
}
