//! Provider dispatch.
//!
//! Resolves a provider, invokes it and normalizes its output into a single
//! well-formed chunk stream: sequence numbers start at 0 and increase by
//! one, exactly one terminal chunk ends the stream, and errors come from
//! the provider taxonomy only.
//!
//! A transient transport error is retried exactly once after a fixed
//! backoff, and only when the failed attempt has not yet produced a chunk.
//! Once output has reached the caller a retry would duplicate it, so the
//! error propagates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;

use cp_domain::config::DispatchConfig;
use cp_domain::error::{Error, Result};
use cp_domain::prompt::Prompt;
use cp_domain::stream::{BoxStream, Chunk};
use cp_domain::trace::TraceEvent;

use crate::registry::ProviderRegistry;
use crate::traits::{CopilotProvider, GenerateOptions};

const MAX_ATTEMPTS: u32 = 2;

pub struct ProviderDispatcher {
    registry: Arc<ProviderRegistry>,
    retry_backoff: Duration,
    chunk_timeout: Duration,
}

impl ProviderDispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, config: &DispatchConfig) -> Self {
        Self {
            registry,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            chunk_timeout: Duration::from_millis(config.chunk_timeout_ms),
        }
    }

    /// Start generation on `provider_name`.
    ///
    /// Resolution failures are returned directly; everything after that
    /// arrives through the stream, which ends after its first error.
    pub fn dispatch(
        &self,
        provider_name: &str,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        let provider = self.registry.resolve(provider_name)?;
        Ok(drive(
            provider,
            prompt.clone(),
            options.clone(),
            self.retry_backoff,
            self.chunk_timeout,
        ))
    }
}

/// Fold anything a provider returns outside the taxonomy into a
/// non-transient transport error.
fn normalize(provider: &str, err: Error) -> Error {
    match err {
        e @ (Error::ProviderUnavailable { .. }
        | Error::ProviderRateLimited { .. }
        | Error::ProviderContentRejected { .. }
        | Error::ProviderTransport { .. }) => e,
        Error::Auth(message) | Error::Config(message) => Error::ProviderUnavailable {
            provider: provider.to_owned(),
            message,
        },
        other => Error::ProviderTransport {
            provider: provider.to_owned(),
            message: other.to_string(),
            transient: false,
        },
    }
}

fn drive(
    provider: Arc<dyn CopilotProvider>,
    prompt: Prompt,
    options: GenerateOptions,
    retry_backoff: Duration,
    chunk_timeout: Duration,
) -> BoxStream<'static, Result<Chunk>> {
    let stream = async_stream::stream! {
        let name = provider.name().to_owned();
        let turn_id = options.turn_id.clone().unwrap_or_default();
        let mut sequence: u64 = 0;

        for attempt in 1..=MAX_ATTEMPTS {
            let started = Instant::now();
            let mut attempt_chunks: u64 = 0;

            // ── one attempt ──
            let failure: Option<Error> = 'attempt: {
                let mut inner = match provider.generate(&prompt, &options).await {
                    Ok(s) => s,
                    Err(e) => break 'attempt Some(normalize(&name, e)),
                };

                loop {
                    let next = match tokio::time::timeout(chunk_timeout, inner.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            break 'attempt Some(Error::ProviderTransport {
                                provider: name.clone(),
                                message: format!(
                                    "no chunk within {}ms",
                                    chunk_timeout.as_millis()
                                ),
                                transient: true,
                            });
                        }
                    };

                    match next {
                        Some(Ok(mut chunk)) => {
                            chunk.sequence = sequence;
                            sequence += 1;
                            attempt_chunks += 1;
                            let terminal = chunk.terminal;
                            yield Ok(chunk);
                            if terminal {
                                break 'attempt None;
                            }
                        }
                        Some(Err(e)) => break 'attempt Some(normalize(&name, e)),
                        None => {
                            yield Ok(Chunk::terminal(sequence, None));
                            attempt_chunks += 1;
                            break 'attempt None;
                        }
                    }
                }
            };

            let outcome = match &failure {
                None => "ok".to_string(),
                Some(e) => e.to_string(),
            };
            TraceEvent::ProviderRequest {
                provider: name.clone(),
                turn_id: turn_id.clone(),
                attempt,
                duration_ms: started.elapsed().as_millis() as u64,
                chunks: attempt_chunks,
                outcome,
            }
            .emit();

            let Some(err) = failure else {
                return;
            };

            let retryable = err.is_transient_transport() && attempt_chunks == 0;
            if retryable && attempt < MAX_ATTEMPTS {
                tracing::warn!(
                    provider_id = %name,
                    turn_id = %turn_id,
                    error = %err,
                    "transient transport error, retrying once"
                );
                TraceEvent::ProviderRetry {
                    provider: name.clone(),
                    turn_id: turn_id.clone(),
                    backoff_ms: retry_backoff.as_millis() as u64,
                    reason: err.to_string(),
                }
                .emit();
                tokio::time::sleep(retry_backoff).await;
                continue;
            }

            yield Err(err);
            return;
        }
    };

    Box::pin(stream)
}
