use serde::Serialize;

/// Structured trace events emitted across all copilot crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ProviderRegistered {
        provider: String,
        required: bool,
        streaming: bool,
    },
    ProviderValidated {
        provider: String,
        valid: bool,
    },
    ProviderRequest {
        provider: String,
        turn_id: String,
        attempt: u32,
        duration_ms: u64,
        chunks: u64,
        outcome: String,
    },
    ProviderRetry {
        provider: String,
        turn_id: String,
        backoff_ms: u64,
        reason: String,
    },
    PromptBuilt {
        session_id: String,
        messages: usize,
        estimated_tokens: u32,
        budget: u32,
        dropped_turns: usize,
    },
    SessionCreated {
        session_id: String,
        principal: String,
        workspace: String,
    },
    SessionExpired {
        session_id: String,
        idle_minutes: u32,
    },
    TurnStarted {
        session_id: String,
        turn_id: String,
        provider: String,
    },
    TurnFinished {
        session_id: String,
        turn_id: String,
        status: String,
        total_tokens: u32,
    },
    QuotaReserved {
        principal: String,
        workspace: String,
        reservation_id: String,
        estimated_cost: u64,
    },
    QuotaSettled {
        reservation_id: String,
        charged: u64,
    },
    StreamReclaimed {
        turn_id: String,
        chunks: usize,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cp_event");
    }
}
