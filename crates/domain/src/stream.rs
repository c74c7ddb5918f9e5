use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One increment of streamed generation output (provider-agnostic).
///
/// Sequence numbers start at 0 and increase by one per chunk within a turn.
/// The last chunk of a finite stream has `terminal = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub sequence: u64,
    /// Text appended by this chunk. May be empty on the terminal chunk.
    #[serde(default)]
    pub delta: String,
    #[serde(default)]
    pub terminal: bool,
    /// Structured attachments (e.g. generated image URLs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Provider-reported usage; only ever set on the terminal chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Chunk {
    pub fn text(sequence: u64, delta: impl Into<String>) -> Self {
        Self {
            sequence,
            delta: delta.into(),
            terminal: false,
            attachments: Vec::new(),
            usage: None,
        }
    }

    pub fn terminal(sequence: u64, usage: Option<Usage>) -> Self {
        Self {
            sequence,
            delta: String::new(),
            terminal: true,
            attachments: Vec::new(),
            usage,
        }
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
