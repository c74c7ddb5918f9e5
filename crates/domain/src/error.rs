/// Shared error type used across all copilot crates.
///
/// Variants are grouped by [`ErrorKind`]; callers that surface an error to
/// a user should report `kind()` and `advice()` alongside the message so the
/// user can tell "try again" from "fix your input" from "not authorized".
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ── Authorization ────────────────────────────────────────────────
    #[error("permission denied: {principal} may not {action} in workspace {workspace}")]
    PermissionDenied {
        principal: String,
        workspace: String,
        action: String,
    },

    #[error("quota exceeded: {used} used + {requested} requested > {limit} allowed")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    // ── Provider registry ────────────────────────────────────────────
    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{provider}' has an invalid configuration: {cause}")]
    InvalidProviderConfig { provider: String, cause: String },

    // ── Provider invocation ──────────────────────────────────────────
    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("provider {provider} rate limited: {message}")]
    ProviderRateLimited { provider: String, message: String },

    #[error("provider {provider} rejected the content: {message}")]
    ProviderContentRejected { provider: String, message: String },

    #[error("provider {provider} transport error: {message}")]
    ProviderTransport {
        provider: String,
        message: String,
        /// Connection resets, timeouts and similar failures that may succeed
        /// on a second attempt.
        transient: bool,
    },

    // ── Capacity ─────────────────────────────────────────────────────
    #[error("prompt too large: {tokens} tokens exceeds the {budget}-token budget")]
    PromptTooLarge { tokens: u32, budget: u32 },

    #[error("session {session_id} already has a turn in flight")]
    TurnInFlight { session_id: String },

    // ── State ────────────────────────────────────────────────────────
    #[error("session {session_id} is {status} and accepts no further turns")]
    SessionClosed { session_id: String, status: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("turn not found: {0}")]
    TurnNotFound(String),

    #[error("turn {turn_id} is already {status}")]
    TurnFinalized { turn_id: String, status: String },

    #[error("stream for turn {0} is closed")]
    StreamClosed(String),

    #[error("no stream buffer for turn {0}")]
    StreamNotFound(String),

    // ── Ambient ──────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    Provider,
    Capacity,
    State,
    Config,
    Internal,
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAdvice {
    /// Transient: the same request may succeed later.
    RetryLater,
    /// The request itself must change (shorter prompt, different session).
    FixInput,
    /// The principal lacks permission or quota.
    NotAuthorized,
    /// Misconfiguration or a server-side defect.
    Bug,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } | Self::QuotaExceeded { .. } => ErrorKind::Authorization,
            Self::UnknownProvider(_)
            | Self::ProviderUnavailable { .. }
            | Self::ProviderRateLimited { .. }
            | Self::ProviderContentRejected { .. }
            | Self::ProviderTransport { .. } => ErrorKind::Provider,
            Self::PromptTooLarge { .. } | Self::TurnInFlight { .. } => ErrorKind::Capacity,
            Self::SessionClosed { .. }
            | Self::SessionNotFound(_)
            | Self::TurnNotFound(_)
            | Self::TurnFinalized { .. }
            | Self::StreamClosed(_)
            | Self::StreamNotFound(_) => ErrorKind::State,
            Self::DuplicateProvider(_)
            | Self::InvalidProviderConfig { .. }
            | Self::Config(_)
            | Self::Auth(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn advice(&self) -> ErrorAdvice {
        match self {
            Self::PermissionDenied { .. } | Self::QuotaExceeded { .. } => {
                ErrorAdvice::NotAuthorized
            }
            Self::ProviderUnavailable { .. }
            | Self::ProviderRateLimited { .. }
            | Self::ProviderTransport { .. }
            | Self::TurnInFlight { .. } => ErrorAdvice::RetryLater,
            Self::ProviderContentRejected { .. }
            | Self::PromptTooLarge { .. }
            | Self::UnknownProvider(_)
            | Self::SessionClosed { .. }
            | Self::SessionNotFound(_)
            | Self::TurnNotFound(_)
            | Self::StreamNotFound(_) => ErrorAdvice::FixInput,
            _ => ErrorAdvice::Bug,
        }
    }

    /// A copy of this error for fan-out to several readers. Data-only
    /// variants are reproduced exactly; `Io` and `Json` keep their message
    /// as `Other`.
    pub fn cloned(&self) -> Error {
        match self {
            Self::PermissionDenied {
                principal,
                workspace,
                action,
            } => Self::PermissionDenied {
                principal: principal.clone(),
                workspace: workspace.clone(),
                action: action.clone(),
            },
            Self::QuotaExceeded {
                used,
                requested,
                limit,
            } => Self::QuotaExceeded {
                used: *used,
                requested: *requested,
                limit: *limit,
            },
            Self::DuplicateProvider(n) => Self::DuplicateProvider(n.clone()),
            Self::UnknownProvider(n) => Self::UnknownProvider(n.clone()),
            Self::InvalidProviderConfig { provider, cause } => Self::InvalidProviderConfig {
                provider: provider.clone(),
                cause: cause.clone(),
            },
            Self::ProviderUnavailable { provider, message } => Self::ProviderUnavailable {
                provider: provider.clone(),
                message: message.clone(),
            },
            Self::ProviderRateLimited { provider, message } => Self::ProviderRateLimited {
                provider: provider.clone(),
                message: message.clone(),
            },
            Self::ProviderContentRejected { provider, message } => {
                Self::ProviderContentRejected {
                    provider: provider.clone(),
                    message: message.clone(),
                }
            }
            Self::ProviderTransport {
                provider,
                message,
                transient,
            } => Self::ProviderTransport {
                provider: provider.clone(),
                message: message.clone(),
                transient: *transient,
            },
            Self::PromptTooLarge { tokens, budget } => Self::PromptTooLarge {
                tokens: *tokens,
                budget: *budget,
            },
            Self::TurnInFlight { session_id } => Self::TurnInFlight {
                session_id: session_id.clone(),
            },
            Self::SessionClosed { session_id, status } => Self::SessionClosed {
                session_id: session_id.clone(),
                status: status.clone(),
            },
            Self::SessionNotFound(id) => Self::SessionNotFound(id.clone()),
            Self::TurnNotFound(id) => Self::TurnNotFound(id.clone()),
            Self::TurnFinalized { turn_id, status } => Self::TurnFinalized {
                turn_id: turn_id.clone(),
                status: status.clone(),
            },
            Self::StreamClosed(id) => Self::StreamClosed(id.clone()),
            Self::StreamNotFound(id) => Self::StreamNotFound(id.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Auth(m) => Self::Auth(m.clone()),
            Self::Io(e) => Self::Other(format!("IO: {e}")),
            Self::Json(e) => Self::Other(format!("JSON: {e}")),
            Self::Other(m) => Self::Other(m.clone()),
        }
    }

    /// Whether the dispatcher may retry the call that produced this error.
    ///
    /// Only transient transport failures qualify. Rate limits and content
    /// rejections are never retried.
    pub fn is_transient_transport(&self) -> bool {
        matches!(self, Self::ProviderTransport { transient: true, .. })
    }
}
