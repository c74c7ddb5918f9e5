pub mod bootstrap;
pub mod cli;
pub mod runtime;

pub use runtime::{CopilotService, NewTurnRequest, TurnHandle};
