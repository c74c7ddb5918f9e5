//! Deterministic prompt assembly.
//!
//! Renders system instructions, a bounded window of session history and
//! the new user turn into a provider-agnostic [`Prompt`]. Given the same
//! session, content and capabilities the output is identical.
//!
//! [`Prompt`]: cp_domain::prompt::Prompt

pub mod builder;
pub mod tokens;
pub mod window;

pub use builder::PromptBuilder;
