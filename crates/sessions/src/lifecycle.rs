//! Session idle lifecycle.
//!
//! Evaluated by the background sweep. A session whose last activity is
//! older than the configured idle timeout transitions to `expired`; a
//! session with a turn in flight is never expired underneath it.

use chrono::{DateTime, Utc};

use cp_domain::config::SessionsConfig;

use crate::types::Session;

/// Reason a session expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireReason {
    IdleTimeout { idle_minutes: u32 },
}

impl std::fmt::Display for ExpireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdleTimeout { idle_minutes } => write!(f, "idle timeout ({idle_minutes}m)"),
        }
    }
}

/// Decides whether a session should expire.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    idle_minutes: Option<u32>,
}

impl LifecycleManager {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            idle_minutes: config.idle_minutes,
        }
    }

    pub fn idle_minutes(&self) -> Option<u32> {
        self.idle_minutes
    }

    /// Returns `Some(reason)` when `session` should expire at `now`.
    pub fn should_expire(&self, session: &Session, now: DateTime<Utc>) -> Option<ExpireReason> {
        let idle = self.idle_minutes?;
        if !session.status.accepts_turns() || session.in_flight().is_some() {
            return None;
        }

        let elapsed = now.signed_duration_since(session.updated_at).num_minutes();
        if elapsed >= idle as i64 {
            Some(ExpireReason::IdleTimeout { idle_minutes: idle })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SessionStatus, Turn, TurnContent, TurnStatus};
    use cp_domain::ids::TurnId;
    use cp_domain::prompt::Role;

    fn mgr(idle: Option<u32>) -> LifecycleManager {
        LifecycleManager::new(&SessionsConfig {
            idle_minutes: idle,
            state_path: None,
        })
    }

    fn stale_session(minutes: i64) -> Session {
        let mut s = Session::new("u1", "w1");
        s.updated_at = Utc::now() - chrono::Duration::minutes(minutes);
        s
    }

    #[test]
    fn idle_session_expires() {
        let reason = mgr(Some(30)).should_expire(&stale_session(45), Utc::now());
        assert_eq!(reason, Some(ExpireReason::IdleTimeout { idle_minutes: 30 }));
    }

    #[test]
    fn recent_session_stays() {
        assert!(mgr(Some(30)).should_expire(&stale_session(5), Utc::now()).is_none());
    }

    #[test]
    fn disabled_idle_never_expires() {
        assert!(mgr(None).should_expire(&stale_session(10_000), Utc::now()).is_none());
    }

    #[test]
    fn closed_session_is_not_expired_again() {
        let mut s = stale_session(90);
        s.status = SessionStatus::Closed;
        assert!(mgr(Some(30)).should_expire(&s, Utc::now()).is_none());
    }

    #[test]
    fn in_flight_turn_blocks_expiry() {
        let mut s = stale_session(90);
        s.turns.push(Turn {
            id: TurnId::new(),
            role: Role::Assistant,
            content: TurnContent::default(),
            provider: Some("openai".into()),
            token_count: 0,
            status: TurnStatus::Streaming,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        });
        assert!(mgr(Some(30)).should_expire(&s, Utc::now()).is_none());
    }
}
