//! Chat session state for the copilot.
//!
//! A session is an ordered, append-only list of turns owned by one
//! principal in one workspace. [`SessionManager`] is the only writer: it
//! enforces the single in-flight turn per session, the terminal session
//! states, and idle expiry.

pub mod lifecycle;
pub mod manager;
pub mod store;
pub mod types;

pub use lifecycle::{ExpireReason, LifecycleManager};
pub use manager::{SessionManager, TurnStart};
pub use store::SessionStore;
pub use types::{Session, SessionStatus, Turn, TurnContent, TurnStatus};
