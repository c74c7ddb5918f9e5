use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cp_domain::ids::{SessionId, TurnId};
use cp_domain::prompt::Role;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// Close was requested while a turn was in flight; becomes `Closed`
    /// once that turn finishes.
    Finalizing,
    Closed,
    Expired,
}

impl SessionStatus {
    /// Whether the session accepts new turns.
    pub fn accepts_turns(self) -> bool {
        self == Self::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

impl TurnStatus {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_in_flight()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text plus optional structured attachments (image URLs, doc refs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl TurnContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// One message within a session.
///
/// Content is fixed once the turn reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: TurnContent,
    /// Provider that produced this turn; `None` for user turns.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub token_count: u32,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason for `Failed` turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub principal: String,
    pub workspace: String,
    pub turns: Vec<Turn>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(principal: &str, workspace: &str) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            principal: principal.to_owned(),
            workspace: workspace.to_owned(),
            turns: Vec::new(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// The turn currently pending or streaming, if any.
    pub fn in_flight(&self) -> Option<&Turn> {
        self.turns.iter().find(|t| t.status.is_in_flight())
    }

    pub fn turn(&self, turn_id: &TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| &t.id == turn_id)
    }

    pub(crate) fn turn_mut(&mut self, turn_id: &TurnId) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| &t.id == turn_id)
    }

    /// Turns usable as conversation history: user turns and completed
    /// assistant turns, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns
            .iter()
            .filter(|t| t.status == TurnStatus::Complete)
    }

    /// Sum of token counts over completed assistant turns.
    pub fn completed_tokens(&self) -> u64 {
        self.turns
            .iter()
            .filter(|t| t.role == Role::Assistant && t.status == TurnStatus::Complete)
            .map(|t| t.token_count as u64)
            .sum()
    }
}
