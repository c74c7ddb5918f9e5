//! Dispatcher behavior against scripted providers: retry policy, sequence
//! normalization and terminal-chunk guarantees.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;

use cp_domain::capability::{ProviderCapabilities, ProviderDescriptor};
use cp_domain::config::{CopilotConfig, DispatchConfig, ProviderConfig};
use cp_domain::error::{Error, Result};
use cp_domain::prompt::{Prompt, PromptMessage};
use cp_domain::stream::{BoxStream, Chunk, Usage};
use cp_providers::{CopilotProvider, GenerateOptions, ProviderDispatcher, ProviderRegistry};

// ── Scripted provider ───────────────────────────────────────────────

/// One scripted call: fail before streaming, or stream these items.
enum Call {
    Fail(Error),
    Stream(Vec<Result<Chunk>>),
}

struct Scripted {
    name: String,
    caps: ProviderCapabilities,
    calls: Mutex<VecDeque<Call>>,
    invocations: AtomicU32,
}

impl Scripted {
    fn new(name: &str, calls: Vec<Call>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            caps: ProviderCapabilities {
                supports_streaming: true,
                ..Default::default()
            },
            calls: Mutex::new(calls.into()),
            invocations: AtomicU32::new(0),
        })
    }

    fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CopilotProvider for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.caps
    }

    fn validate_config(&self, _: &ProviderConfig) -> Result<()> {
        Ok(())
    }

    async fn generate(
        &self,
        _prompt: &Prompt,
        _options: &GenerateOptions,
    ) -> Result<BoxStream<'static, Result<Chunk>>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.calls.lock().pop_front() {
            Some(Call::Fail(e)) => Err(e),
            Some(Call::Stream(items)) => Ok(Box::pin(futures_util::stream::iter(items))),
            None => Err(Error::ProviderUnavailable {
                provider: self.name.clone(),
                message: "script exhausted".into(),
            }),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn transient() -> Error {
    Error::ProviderTransport {
        provider: "scripted".into(),
        message: "connection reset".into(),
        transient: true,
    }
}

fn hello_stream() -> Vec<Result<Chunk>> {
    vec![
        Ok(Chunk::text(0, "Hi")),
        Ok(Chunk::text(1, " there")),
        Ok(Chunk::terminal(2, Some(Usage::new(3, 2)))),
    ]
}

fn dispatcher_with(provider: Arc<Scripted>) -> ProviderDispatcher {
    let mut registry = ProviderRegistry::new();
    registry
        .register(
            ProviderDescriptor {
                name: provider.name.clone(),
                capabilities: provider.caps.clone(),
                required: true,
                config_valid: false,
            },
            provider.clone(),
        )
        .unwrap();
    registry
        .validate_all(&CopilotConfig {
            providers: vec![ProviderConfig {
                id: provider.name.clone(),
                ..ProviderConfig::openai_default()
            }],
            ..Default::default()
        })
        .unwrap();

    ProviderDispatcher::new(
        Arc::new(registry),
        &DispatchConfig {
            default_provider: None,
            retry_backoff_ms: 5,
            chunk_timeout_ms: 200,
        },
    )
}

fn prompt() -> Prompt {
    Prompt {
        messages: vec![PromptMessage::user("Hello")],
        estimated_tokens: 6,
        dropped_turns: 0,
    }
}

async fn collect(d: &ProviderDispatcher) -> Vec<Result<Chunk>> {
    d.dispatch("scripted", &prompt(), &GenerateOptions::default())
        .unwrap()
        .collect()
        .await
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn streams_chunks_in_order() {
    let p = Scripted::new("scripted", vec![Call::Stream(hello_stream())]);
    let out = collect(&dispatcher_with(p.clone())).await;

    let chunks: Vec<Chunk> = out.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].delta, "Hi");
    assert_eq!(chunks[1].delta, " there");
    assert!(chunks[2].terminal);
    assert_eq!(chunks[2].usage, Some(Usage::new(3, 2)));
    assert_eq!(p.invocations(), 1);
}

#[tokio::test]
async fn transient_failure_then_success_completes() {
    let p = Scripted::new(
        "scripted",
        vec![Call::Fail(transient()), Call::Stream(hello_stream())],
    );
    let out = collect(&dispatcher_with(p.clone())).await;

    assert!(out.iter().all(|r| r.is_ok()));
    assert!(out.last().unwrap().as_ref().unwrap().terminal);
    assert_eq!(p.invocations(), 2);
}

#[tokio::test]
async fn two_transient_failures_surface_provider_error() {
    let p = Scripted::new(
        "scripted",
        vec![
            Call::Fail(transient()),
            Call::Fail(transient()),
            Call::Stream(hello_stream()),
        ],
    );
    let out = collect(&dispatcher_with(p.clone())).await;

    assert_eq!(out.len(), 1);
    let err = out[0].as_ref().unwrap_err();
    assert!(matches!(err, Error::ProviderTransport { .. }));
    assert_eq!(err.kind(), cp_domain::error::ErrorKind::Provider);
    assert_eq!(p.invocations(), 2);
}

#[tokio::test]
async fn rate_limited_is_not_retried() {
    let p = Scripted::new(
        "scripted",
        vec![
            Call::Fail(Error::ProviderRateLimited {
                provider: "scripted".into(),
                message: "429".into(),
            }),
            Call::Stream(hello_stream()),
        ],
    );
    let out = collect(&dispatcher_with(p.clone())).await;

    assert_eq!(out.len(), 1);
    assert!(matches!(out[0], Err(Error::ProviderRateLimited { .. })));
    assert_eq!(p.invocations(), 1);
}

#[tokio::test]
async fn non_transient_transport_is_not_retried() {
    let p = Scripted::new(
        "scripted",
        vec![
            Call::Fail(Error::ProviderTransport {
                provider: "scripted".into(),
                message: "bad payload".into(),
                transient: false,
            }),
            Call::Stream(hello_stream()),
        ],
    );
    let out = collect(&dispatcher_with(p.clone())).await;
    assert!(out[0].is_err());
    assert_eq!(p.invocations(), 1);
}

#[tokio::test]
async fn failure_after_partial_output_is_not_retried() {
    let p = Scripted::new(
        "scripted",
        vec![
            Call::Stream(vec![Ok(Chunk::text(0, "Hi")), Err(transient())]),
            Call::Stream(hello_stream()),
        ],
    );
    let out = collect(&dispatcher_with(p.clone())).await;

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].as_ref().unwrap().delta, "Hi");
    assert!(out[1].is_err());
    assert_eq!(p.invocations(), 1);
}

#[tokio::test]
async fn sequences_are_renumbered_and_terminal_added() {
    // Provider numbers badly and never sends a terminal chunk.
    let p = Scripted::new(
        "scripted",
        vec![Call::Stream(vec![
            Ok(Chunk::text(7, "a")),
            Ok(Chunk::text(7, "b")),
            Ok(Chunk::text(42, "c")),
        ])],
    );
    let out = collect(&dispatcher_with(p)).await;
    let chunks: Vec<Chunk> = out.into_iter().map(|r| r.unwrap()).collect();

    let seqs: Vec<u64> = chunks.iter().map(|c| c.sequence).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    assert_eq!(chunks.iter().filter(|c| c.terminal).count(), 1);
    assert!(chunks[3].terminal);
}

#[tokio::test]
async fn chunks_after_terminal_are_dropped() {
    let p = Scripted::new(
        "scripted",
        vec![Call::Stream(vec![
            Ok(Chunk::terminal(0, None)),
            Ok(Chunk::text(1, "late")),
        ])],
    );
    let out = collect(&dispatcher_with(p)).await;
    assert_eq!(out.len(), 1);
}

#[tokio::test]
async fn unknown_provider_fails_before_streaming() {
    let p = Scripted::new("scripted", vec![]);
    let d = dispatcher_with(p);
    let result = d.dispatch("missing", &prompt(), &GenerateOptions::default());
    assert!(matches!(result, Err(Error::UnknownProvider(_))));
}
