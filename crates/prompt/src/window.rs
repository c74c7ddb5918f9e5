use cp_domain::prompt::PromptMessage;
use cp_sessions::Turn;

use crate::tokens;

/// History selected to fit a token allowance.
#[derive(Debug, Default)]
pub struct Window {
    /// Chronological order, oldest first.
    pub messages: Vec<PromptMessage>,
    pub tokens: u32,
    pub dropped: usize,
}

/// Walk `history` newest-first, keeping turns while they fit in
/// `allowance`. Stops at the first turn that does not fit; everything
/// older is dropped, even if a smaller older turn would have fit.
pub fn select<'a, I>(history: I, allowance: u32) -> Window
where
    I: DoubleEndedIterator<Item = &'a Turn>,
{
    let turns: Vec<&Turn> = history.rev().collect();
    let mut window = Window::default();

    for (idx, turn) in turns.iter().enumerate() {
        let cost = tokens::estimate_message(&turn.content.text);
        if window.tokens.saturating_add(cost) > allowance {
            window.dropped = turns.len() - idx;
            break;
        }
        window.tokens += cost;
        window.messages.push(PromptMessage {
            role: turn.role,
            content: turn.content.text.clone(),
        });
    }

    window.messages.reverse();
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cp_domain::ids::TurnId;
    use cp_domain::prompt::Role;
    use cp_sessions::{TurnContent, TurnStatus};

    fn turn(role: Role, text: &str) -> Turn {
        Turn {
            id: TurnId::new(),
            role,
            content: TurnContent::text(text),
            provider: None,
            token_count: 0,
            status: TurnStatus::Complete,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    #[test]
    fn keeps_everything_under_allowance() {
        let turns = vec![turn(Role::User, "hi"), turn(Role::Assistant, "hello")];
        let w = select(turns.iter(), 1_000);
        assert_eq!(w.messages.len(), 2);
        assert_eq!(w.messages[0].content, "hi");
        assert_eq!(w.dropped, 0);
    }

    #[test]
    fn drops_oldest_first() {
        // Each message costs 4 + 25 = 29 tokens.
        let text = "x".repeat(100);
        let turns: Vec<_> = (0..4).map(|_| turn(Role::User, &text)).collect();
        let w = select(turns.iter(), 60);
        assert_eq!(w.messages.len(), 2);
        assert_eq!(w.tokens, 58);
        assert_eq!(w.dropped, 2);
    }

    #[test]
    fn stops_at_first_overflow() {
        let big = "x".repeat(400);
        let turns = vec![
            turn(Role::User, "old"),
            turn(Role::Assistant, &big),
            turn(Role::User, "new"),
        ];
        let w = select(turns.iter(), 20);
        assert_eq!(w.messages.len(), 1);
        assert_eq!(w.messages[0].content, "new");
        assert_eq!(w.dropped, 2);
    }
}
