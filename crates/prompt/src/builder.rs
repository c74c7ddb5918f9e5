use cp_domain::capability::ProviderCapabilities;
use cp_domain::config::PromptConfig;
use cp_domain::error::{Error, Result};
use cp_domain::prompt::{Prompt, PromptMessage};
use cp_domain::trace::TraceEvent;
use cp_sessions::Session;

use crate::{tokens, window};

/// Deterministic prompt builder.
///
/// Pure apart from tracing: accepts a session snapshot, the new user
/// content and the target provider's capabilities, returns the rendered
/// prompt. History that does not fit is dropped, never summarized.
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Reject `new_content` that cannot fit any prompt for this provider.
    ///
    /// Returns the estimated token cost of the new turn.
    pub fn check_fits(&self, new_content: &str, caps: &ProviderCapabilities) -> Result<u32> {
        let new_tokens = tokens::estimate_message(new_content);
        if new_tokens > caps.min_prompt_tokens {
            return Err(Error::PromptTooLarge {
                tokens: new_tokens,
                budget: caps.min_prompt_tokens,
            });
        }

        let fixed = self.system_tokens().saturating_add(new_tokens);
        let budget = caps.prompt_budget();
        if fixed > budget {
            return Err(Error::PromptTooLarge {
                tokens: fixed,
                budget,
            });
        }

        Ok(new_tokens)
    }

    /// Render the prompt for `new_content` against `session`'s history.
    ///
    /// `session` is the state before the new turn was appended; its
    /// completed turns form the history window.
    pub fn build(
        &self,
        session: &Session,
        new_content: &str,
        caps: &ProviderCapabilities,
    ) -> Result<Prompt> {
        let new_tokens = self.check_fits(new_content, caps)?;
        let budget = caps.prompt_budget();
        let fixed = self.system_tokens() + new_tokens;

        let window = window::select(session.history(), budget - fixed);

        let mut messages = Vec::with_capacity(window.messages.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(PromptMessage::system(self.system_prompt.clone()));
        }
        messages.extend(window.messages);
        messages.push(PromptMessage::user(new_content));

        let prompt = Prompt {
            messages,
            estimated_tokens: fixed + window.tokens,
            dropped_turns: window.dropped,
        };

        if prompt.dropped_turns > 0 {
            tracing::debug!(
                session_id = %session.id,
                dropped = prompt.dropped_turns,
                "history truncated to fit prompt budget"
            );
        }
        TraceEvent::PromptBuilt {
            session_id: session.id.to_string(),
            messages: prompt.messages.len(),
            estimated_tokens: prompt.estimated_tokens,
            budget,
            dropped_turns: prompt.dropped_turns,
        }
        .emit();

        Ok(prompt)
    }

    fn system_tokens(&self) -> u32 {
        if self.system_prompt.is_empty() {
            0
        } else {
            tokens::estimate_message(&self.system_prompt)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cp_domain::ids::TurnId;
    use cp_domain::prompt::Role;
    use cp_sessions::{Turn, TurnContent, TurnStatus};

    fn builder(system: &str) -> PromptBuilder {
        PromptBuilder::new(&PromptConfig {
            system_prompt: system.into(),
        })
    }

    fn caps(context: u32, reserve: u32, min: u32) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            produces_images: false,
            context_window_tokens: context,
            reserve_output_tokens: reserve,
            min_prompt_tokens: min,
        }
    }

    fn push(session: &mut Session, role: Role, text: &str, status: TurnStatus) {
        session.turns.push(Turn {
            id: TurnId::new(),
            role,
            content: TurnContent::text(text),
            provider: None,
            token_count: 0,
            status,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        });
    }

    #[test]
    fn empty_session_renders_system_and_new_turn() {
        let session = Session::new("u", "w");
        let prompt = builder("be brief")
            .build(&session, "Hello", &caps(1_000, 100, 100))
            .unwrap();

        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert_eq!(prompt.last_user_content(), Some("Hello"));
        assert_eq!(prompt.dropped_turns, 0);
        // "be brief" = 2 + 4, "Hello" = 2 + 4
        assert_eq!(prompt.estimated_tokens, 12);
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let prompt = builder("")
            .build(&Session::new("u", "w"), "Hi", &caps(1_000, 100, 100))
            .unwrap();
        assert_eq!(prompt.messages.len(), 1);
        assert_eq!(prompt.messages[0].role, Role::User);
    }

    #[test]
    fn history_in_chronological_order_excluding_unfinished() {
        let mut session = Session::new("u", "w");
        push(&mut session, Role::User, "q1", TurnStatus::Complete);
        push(&mut session, Role::Assistant, "a1", TurnStatus::Complete);
        push(&mut session, Role::User, "q2", TurnStatus::Complete);
        push(&mut session, Role::Assistant, "cut", TurnStatus::Cancelled);

        let prompt = builder("")
            .build(&session, "q3", &caps(1_000, 100, 100))
            .unwrap();
        let contents: Vec<_> = prompt.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "q3"]);
    }

    #[test]
    fn long_history_is_truncated_oldest_first() {
        let mut session = Session::new("u", "w");
        let text = "y".repeat(40); // 10 + 4 = 14 tokens
        for i in 0..10 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            push(&mut session, role, &text, TurnStatus::Complete);
        }

        // budget 50, new turn 5 => 45 for history => 3 turns
        let prompt = builder("")
            .build(&session, "next", &caps(60, 10, 20))
            .unwrap();
        assert_eq!(prompt.messages.len(), 4);
        assert_eq!(prompt.dropped_turns, 7);
        assert!(prompt.estimated_tokens <= 50);
    }

    #[test]
    fn oversize_new_turn_is_rejected() {
        let huge = "z".repeat(1_000);
        let err = builder("")
            .build(&Session::new("u", "w"), &huge, &caps(100_000, 100, 64))
            .unwrap_err();
        assert!(matches!(err, Error::PromptTooLarge { budget: 64, .. }));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let mut session = Session::new("u", "w");
        push(&mut session, Role::User, "hello", TurnStatus::Complete);
        push(&mut session, Role::Assistant, "hi there", TurnStatus::Complete);

        let b = builder("sys");
        let c = caps(500, 50, 50);
        assert_eq!(b.build(&session, "again", &c).unwrap(), b.build(&session, "again", &c).unwrap());
    }
}
