pub mod capability;
pub mod config;
pub mod error;
pub mod ids;
pub mod prompt;
pub mod stream;
pub mod trace;
