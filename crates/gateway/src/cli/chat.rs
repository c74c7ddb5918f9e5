//! `copilot chat`: interactive REPL command.
//!
//! Each line becomes one turn on the current session; the reply streams to
//! stdout as chunks arrive. Ctrl+C while a reply is streaming cancels that
//! turn. Slash-commands manage the session.

use std::io::Write;

use futures_util::StreamExt;

use cp_domain::config::Config;
use cp_domain::ids::{SessionId, TurnId};

use crate::bootstrap;
use crate::runtime::{CopilotService, NewTurnRequest};

/// Who is chatting and where.
#[derive(Debug, Clone)]
pub struct ChatIdentity {
    pub principal: String,
    pub workspace: String,
    pub provider: Option<String>,
}

/// REPL state carried between lines.
#[derive(Default)]
struct ChatState {
    session: Option<SessionId>,
    last_turn: Option<TurnId>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the interactive chat REPL.
pub async fn chat(config: Config, identity: ChatIdentity) -> anyhow::Result<()> {
    let Some(service) = bootstrap::build_copilot(&config)? else {
        anyhow::bail!(
            "copilot is inactive (needs copilot.enabled = true and server.graphql = true)"
        );
    };
    bootstrap::spawn_background_tasks(&service, &config.copilot.stream);

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".copilot")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    // stdout carries replies only.
    eprintln!("copilot chat");
    eprintln!(
        "principal: {}  |  workspace: {}  |  /help for commands, Ctrl+D to exit",
        identity.principal, identity.workspace
    );
    eprintln!();

    let mut state = ChatState::default();
    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(trimmed, &service, &mut state).await {
                        break;
                    }
                    continue;
                }

                if let Err(e) = send_message(&service, &identity, &mut state, trimmed).await {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    if let Err(e) = service.sessions().flush() {
        tracing::warn!(error = %e, "session flush on exit failed");
    }
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash command handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process a slash command. Returns `true` if the REPL should exit.
async fn handle_slash_command(
    input: &str,
    service: &CopilotService,
    state: &mut ChatState,
) -> bool {
    let cmd = input.split_whitespace().next().unwrap_or(input);

    match cmd {
        "/exit" | "/quit" => return true,

        "/cancel" => match &state.last_turn {
            Some(turn_id) => match service.cancel(turn_id).await {
                Ok(true) => eprintln!("Turn {turn_id} cancelled."),
                Ok(false) => eprintln!("Turn {turn_id} had already finished."),
                Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
            },
            None => eprintln!("No turn to cancel."),
        },

        "/session" => match &state.session {
            Some(id) => match service.inspect_session(id) {
                Ok(session) => {
                    eprintln!("Session: {}", session.id);
                    eprintln!("Status:  {}", session.status.as_str());
                    eprintln!("Turns:   {}", session.turns.len());
                    eprintln!("Tokens:  {}", session.completed_tokens());
                }
                Err(e) => eprintln!("\x1B[31merror: {e}\x1B[0m"),
            },
            None => eprintln!("No session yet; send a message to start one."),
        },

        "/new" => {
            if let Some(id) = state.session.take() {
                if let Err(e) = service.close_session(&id) {
                    tracing::debug!(error = %e, "closing previous session failed");
                }
            }
            state.last_turn = None;
            eprintln!("Started a fresh session.");
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /cancel       Cancel the last turn if it is still running");
            eprintln!("  /session      Show the current session");
            eprintln!("  /new          Close this session and start a new one");
            eprintln!("  /exit, /quit  Exit the chat");
            eprintln!("  /help         Show this help");
        }

        other => eprintln!("Unknown command: {other}  (type /help for a list)"),
    }

    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message sending + chunk streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send_message(
    service: &CopilotService,
    identity: &ChatIdentity,
    state: &mut ChatState,
    content: &str,
) -> anyhow::Result<()> {
    let handle = service
        .new_turn(NewTurnRequest {
            session_id: state.session.clone(),
            workspace_id: identity.workspace.clone(),
            principal: identity.principal.clone(),
            content: content.to_string(),
            provider: identity.provider.clone(),
        })
        .await?;

    state.session = Some(handle.session_id.clone());
    state.last_turn = Some(handle.turn_id.clone());
    let turn_id = handle.turn_id;
    let mut stream = handle.stream;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                service.cancel(&turn_id).await?;
                eprintln!("\n(turn cancelled)");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    print!("{}", chunk.delta);
                    for url in &chunk.attachments {
                        eprintln!("\x1B[2m[attachment: {url}]\x1B[0m");
                    }
                    std::io::stdout().flush().ok();
                    if chunk.terminal {
                        println!();
                        println!();
                    }
                }
                Some(Err(e)) => {
                    println!();
                    eprintln!("\x1B[31merror ({:?}): {e}\x1B[0m", e.kind());
                    break;
                }
                None => break,
            },
        }
    }

    Ok(())
}
