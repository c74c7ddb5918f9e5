//! Turn producer: the task that pulls a provider stream into the stream
//! cache and settles session, quota and cache state when it ends.
//!
//! Entry point: [`spawn_turn`]. Every terminal path (complete, fail,
//! cancel, idle abandonment) races through the session manager first;
//! only the transition that wins there takes the turn's
//! [`CancelMap`](super::cancel::CancelMap) entry and settles the quota
//! reservation.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use cp_domain::error::{Error, Result};
use cp_domain::ids::TurnId;
use cp_domain::stream::{BoxStream, Chunk, Usage};
use cp_prompt::tokens;
use cp_sessions::TurnContent;

use super::stream_cache::AbandonedStream;
use super::CopilotService;

/// Start the producer for `turn_id` on the runtime.
pub(super) fn spawn_turn(
    service: CopilotService,
    turn_id: TurnId,
    upstream: BoxStream<'static, Result<Chunk>>,
    token: CancellationToken,
    prompt_tokens: u32,
) {
    let span = tracing::info_span!("turn", turn_id = %turn_id);
    tokio::spawn(
        async move {
            tracing::debug!("turn started");
            drive(service, turn_id, upstream, token, prompt_tokens).await;
        }
        .instrument(span),
    );
}

async fn drive(
    service: CopilotService,
    turn_id: TurnId,
    mut upstream: BoxStream<'static, Result<Chunk>>,
    token: CancellationToken,
    prompt_tokens: u32,
) {
    let mut content = TurnContent::default();
    let mut started = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("producer stopped by cancel");
                return;
            }
            next = upstream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                fail(&service, &turn_id, content, e).await;
                return;
            }
            None => {
                let e = Error::ProviderTransport {
                    provider: provider_of(&service, &turn_id),
                    message: "stream ended without a terminal chunk".into(),
                    transient: false,
                };
                fail(&service, &turn_id, content, e).await;
                return;
            }
        };

        if !started {
            started = true;
            match service.sessions.mark_streaming(&turn_id) {
                Ok(()) => {}
                Err(e @ Error::TurnFinalized { .. }) => {
                    tracing::debug!(error = %e, "turn no longer accepts output");
                    return;
                }
                Err(e) => {
                    fail(&service, &turn_id, content, e).await;
                    return;
                }
            }
        }

        content.text.push_str(&chunk.delta);
        content.attachments.extend(chunk.attachments.iter().cloned());

        if chunk.terminal {
            let usage = chunk.usage.unwrap_or_else(|| {
                Usage::new(prompt_tokens, tokens::estimate_text(&content.text))
            });
            complete(&service, &turn_id, content, usage, chunk).await;
            return;
        }

        if let Err(e) = service.streams.append(&turn_id, chunk) {
            fail(&service, &turn_id, content, e).await;
            return;
        }
    }
}

/// Record a completed turn, charge the actual usage, then publish the
/// terminal chunk. Readers that see the terminal chunk observe a settled
/// session and ledger.
async fn complete(
    service: &CopilotService,
    turn_id: &TurnId,
    content: TurnContent,
    usage: Usage,
    terminal: Chunk,
) {
    match service.sessions.complete_turn(turn_id, content, usage) {
        Ok(_) => {
            let cost = service.quota.cost_of(usage.total_tokens);
            if let Some(active) = service.cancels.take(turn_id) {
                if let Err(e) = service.gate.commit(&active.reservation, cost).await {
                    tracing::warn!(error = %e, "quota commit failed");
                }
            }
            if let Err(e) = service.streams.append(turn_id, terminal) {
                tracing::debug!(error = %e, "stream already gone at completion");
            }
            tracing::info!(
                total_tokens = usage.total_tokens,
                cost,
                "turn complete"
            );
        }
        Err(e) => tracing::debug!(error = %e, "completion ignored"),
    }
}

/// Record a failed turn, keep its partial output and release the hold.
pub(super) async fn fail(
    service: &CopilotService,
    turn_id: &TurnId,
    partial: TurnContent,
    error: Error,
) {
    match service.sessions.fail_turn(turn_id, partial, &error.to_string()) {
        Ok(_) => {
            if let Some(active) = service.cancels.take(turn_id) {
                if let Err(e) = service.gate.release(&active.reservation).await {
                    tracing::warn!(error = %e, "quota release failed");
                }
            }
            tracing::warn!(error = %error, kind = ?error.kind(), "turn failed");
            if let Err(e) = service.streams.fail(turn_id, error) {
                tracing::debug!(error = %e, "stream already gone at failure");
            }
        }
        Err(e) => tracing::debug!(error = %e, "failure ignored"),
    }
}

/// Settle a turn whose buffer the sweep closed for idleness. Its readers
/// already got `StreamClosed`; the producer is stopped and the hold freed.
pub(super) async fn abandon(service: &CopilotService, stream: AbandonedStream) {
    let turn_id = stream.turn_id;
    let mut partial = TurnContent::default();
    for chunk in &stream.chunks {
        partial.text.push_str(&chunk.delta);
        partial.attachments.extend(chunk.attachments.iter().cloned());
    }

    match service.sessions.fail_turn(&turn_id, partial, "stream idle timeout") {
        Ok(_) => {
            if let Some(active) = service.cancels.take(&turn_id) {
                active.token.cancel();
                if let Err(e) = service.gate.release(&active.reservation).await {
                    tracing::warn!(turn_id = %turn_id, error = %e, "quota release failed");
                }
            }
            tracing::warn!(turn_id = %turn_id, chunks = stream.chunks.len(), "idle turn abandoned");
        }
        Err(e) => tracing::debug!(turn_id = %turn_id, error = %e, "idle turn already settled"),
    }
}

fn provider_of(service: &CopilotService, turn_id: &TurnId) -> String {
    service
        .sessions
        .session_for_turn(turn_id)
        .and_then(|sid| service.sessions.inspect(&sid).ok())
        .and_then(|s| s.turn(turn_id).and_then(|t| t.provider.clone()))
        .unwrap_or_default()
}
