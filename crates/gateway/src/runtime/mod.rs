//! Copilot runtime: the orchestrator that ties access control, sessions,
//! prompt building, provider dispatch and the stream cache into one turn
//! lifecycle.
//!
//! Entry point: [`CopilotService::new_turn`] authorizes the request,
//! appends the user turn, renders the prompt and starts the provider. The
//! returned handle streams chunks out of the [`MessageStreamCache`], so a
//! caller that disconnects can [`resume`](CopilotService::resume) from any
//! sequence number.

pub mod access;
pub mod cancel;
pub mod permission;
pub mod quota;
pub mod stream_cache;
pub mod turn;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use cp_domain::capability::ProviderDescriptor;
use cp_domain::config::QuotaConfig;
use cp_domain::error::{Error, Result};
use cp_domain::ids::{SessionId, TurnId};
use cp_domain::stream::{BoxStream, Chunk};
use cp_prompt::{tokens, PromptBuilder};
use cp_providers::{GenerateOptions, ProviderDispatcher, ProviderRegistry};
use cp_sessions::{Session, SessionManager, SessionStatus, TurnContent};

use self::access::{AccessGate, QuotaDecision};
use self::cancel::CancelMap;
use self::stream_cache::MessageStreamCache;

/// Action checked when a request names an existing session.
const ACTION_SESSION: &str = "copilot.session";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / handle types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct NewTurnRequest {
    /// Continue this session; `None` starts a new one.
    pub session_id: Option<SessionId>,
    pub workspace_id: String,
    pub principal: String,
    pub content: String,
    /// Provider override. `None` = configured default.
    pub provider: Option<String>,
}

/// A started turn. `stream` yields the turn's chunks from sequence 0.
pub struct TurnHandle {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub provider: String,
    pub stream: BoxStream<'static, Result<Chunk>>,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub reclaimed_streams: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CopilotService
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared copilot state. Cheap to clone; every field is an `Arc`.
#[derive(Clone)]
pub struct CopilotService {
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) dispatcher: Arc<ProviderDispatcher>,
    pub(crate) prompts: Arc<PromptBuilder>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) streams: Arc<MessageStreamCache>,
    pub(crate) gate: Arc<AccessGate>,
    pub(crate) cancels: Arc<CancelMap>,
    pub(crate) quota: Arc<QuotaConfig>,
    pub(crate) default_provider: Option<String>,
}

impl CopilotService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        dispatcher: Arc<ProviderDispatcher>,
        prompts: Arc<PromptBuilder>,
        sessions: Arc<SessionManager>,
        streams: Arc<MessageStreamCache>,
        gate: Arc<AccessGate>,
        quota: QuotaConfig,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            prompts,
            sessions,
            streams,
            gate,
            cancels: Arc::new(CancelMap::new()),
            quota: Arc::new(quota),
            default_provider,
        }
    }

    // ── Inbound operations ──────────────────────────────────────────

    /// Start a turn.
    ///
    /// Permission is checked before anything else; a deny touches neither
    /// quota nor sessions. Errors returned here happen before any provider
    /// cost is incurred and leave no reservation behind. Failures after the
    /// provider has been started arrive through the handle's stream.
    pub async fn new_turn(&self, req: NewTurnRequest) -> Result<TurnHandle> {
        let estimated_cost = self.estimate_cost(&req.content);
        let (_, reservation) = self
            .gate
            .authorize(&req.principal, &req.workspace_id, estimated_cost)
            .await?;

        match self.start_turn(&req, reservation.clone()).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(release_err) = self.gate.release(&reservation).await {
                    tracing::warn!(error = %release_err, "failed to release quota reservation");
                }
                Err(e)
            }
        }
    }

    /// Reconnect to a turn's output from `from_sequence` on.
    pub fn resume(
        &self,
        turn_id: &TurnId,
        from_sequence: u64,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        self.streams.subscribe(turn_id, from_sequence)
    }

    /// Cancel an in-flight turn. Returns `false` if the turn had already
    /// finished (the earlier transition wins).
    pub async fn cancel(&self, turn_id: &TurnId) -> Result<bool> {
        match self.sessions.cancel_turn(turn_id) {
            Ok(_) => {
                if let Some(active) = self.cancels.take(turn_id) {
                    active.token.cancel();
                    self.streams.cancel(turn_id);
                    if let Err(e) = self.gate.release(&active.reservation).await {
                        tracing::warn!(turn_id = %turn_id, error = %e, "quota release failed");
                    }
                } else {
                    self.streams.cancel(turn_id);
                }
                tracing::info!(turn_id = %turn_id, "turn cancelled");
                Ok(true)
            }
            Err(Error::TurnFinalized { status, .. }) => {
                tracing::debug!(turn_id = %turn_id, status = %status, "cancel after finish ignored");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Live session by id; expired sessions are not found.
    pub fn session(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions.get(session_id)
    }

    /// Audit view of any session, expired ones included.
    pub fn inspect_session(&self, session_id: &SessionId) -> Result<Session> {
        self.sessions.inspect(session_id)
    }

    pub fn close_session(&self, session_id: &SessionId) -> Result<SessionStatus> {
        self.sessions.close_session(session_id)
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.descriptors().cloned().collect()
    }

    /// Reclaim stale stream buffers, settle turns whose buffer went idle,
    /// expire idle sessions and persist the session snapshot.
    pub async fn maintain(&self) -> MaintenanceReport {
        let sweep = self.streams.sweep(Instant::now());
        for stream in sweep.abandoned {
            turn::abandon(self, stream).await;
        }

        let report = MaintenanceReport {
            expired_sessions: self.sessions.expire_idle(Utc::now()).len(),
            reclaimed_streams: sweep.reclaimed,
        };
        if let Err(e) = self.sessions.flush() {
            tracing::warn!(error = %e, "session snapshot flush failed");
        }
        report
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Cost units reserved before the real usage is known: system prompt,
    /// new content and the expected reply.
    fn estimate_cost(&self, content: &str) -> u64 {
        let tokens = tokens::estimate_message(self.prompts.system_prompt())
            .saturating_add(tokens::estimate_message(content))
            .saturating_add(self.quota.estimated_output_tokens);
        self.quota.cost_of(tokens)
    }

    /// Record a turn that failed before its producer started and drop its
    /// buffer. The caller still owns the reservation.
    fn abort_start(&self, turn_id: &TurnId, error: &Error) {
        let reason = error.to_string();
        if let Err(e) = self.sessions.fail_turn(turn_id, TurnContent::default(), &reason) {
            tracing::debug!(turn_id = %turn_id, error = %e, "failed turn not recorded");
        }
        self.streams.cancel(turn_id);
    }

    /// Hand the reservation to the turn and return the token its producer
    /// watches. A cancel that landed before registration found nothing to
    /// settle, so a turn that is already terminal is settled here and
    /// `None` is returned.
    async fn claim(
        &self,
        session_id: &SessionId,
        turn_id: &TurnId,
        reservation: QuotaDecision,
    ) -> Option<CancellationToken> {
        let token = self.cancels.register(turn_id, reservation);

        let finalized = self
            .sessions
            .inspect(session_id)
            .ok()
            .and_then(|s| s.turn(turn_id).map(|t| t.status.is_terminal()))
            .unwrap_or(true);
        if !finalized {
            return Some(token);
        }

        // Whoever takes the entry settles it; `cancel` may have beaten us.
        if let Some(active) = self.cancels.take(turn_id) {
            active.token.cancel();
            if let Err(e) = self.gate.release(&active.reservation).await {
                tracing::warn!(turn_id = %turn_id, error = %e, "quota release failed");
            }
        }
        self.streams.cancel(turn_id);
        tracing::debug!(turn_id = %turn_id, "turn finalized before dispatch");
        None
    }

    /// Everything between authorization and the running producer task.
    /// Returns `Err` only while the reservation is still unsettled.
    async fn start_turn(&self, req: &NewTurnRequest, reservation: QuotaDecision) -> Result<TurnHandle> {
        let provider_name = match &req.provider {
            Some(name) => name.clone(),
            None => self
                .registry
                .default_provider(self.default_provider.as_deref())?,
        };
        let caps = self.registry.resolve(&provider_name)?.capabilities().clone();
        let new_tokens = self.prompts.check_fits(&req.content, &caps)?;

        let session_id = match &req.session_id {
            Some(id) => {
                let session = self.sessions.get(id)?;
                if session.principal != req.principal || session.workspace != req.workspace_id {
                    return Err(Error::PermissionDenied {
                        principal: req.principal.clone(),
                        workspace: req.workspace_id.clone(),
                        action: ACTION_SESSION.into(),
                    });
                }
                session.id
            }
            None => {
                self.sessions
                    .create_session(&req.principal, &req.workspace_id)
                    .id
            }
        };

        let start = self.sessions.append_user_turn(
            &session_id,
            TurnContent::text(req.content.clone()),
            new_tokens,
            &provider_name,
        )?;
        let turn_id = start.turn_id.clone();

        let prepared = self
            .prompts
            .build(&start.prior, &req.content, &caps)
            .and_then(|prompt| {
                self.streams.open(&turn_id)?;
                let stream = self.streams.subscribe(&turn_id, 0)?;
                Ok((prompt, stream))
            });
        let (prompt, stream) = match prepared {
            Ok(ok) => ok,
            Err(e) => {
                self.abort_start(&turn_id, &e);
                return Err(e);
            }
        };

        // From here on the reservation belongs to the turn.
        let Some(token) = self.claim(&session_id, &turn_id, reservation).await else {
            return Ok(TurnHandle {
                session_id,
                turn_id,
                provider: provider_name,
                stream,
            });
        };
        let options = GenerateOptions {
            turn_id: Some(turn_id.to_string()),
            ..Default::default()
        };

        match self.dispatcher.dispatch(&provider_name, &prompt, &options) {
            Ok(upstream) => turn::spawn_turn(
                self.clone(),
                turn_id.clone(),
                upstream,
                token,
                prompt.estimated_tokens,
            ),
            Err(e) => turn::fail(self, &turn_id, TurnContent::default(), e).await,
        }

        Ok(TurnHandle {
            session_id,
            turn_id,
            provider: provider_name,
            stream,
        })
    }
}
