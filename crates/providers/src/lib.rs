pub mod dispatcher;
pub mod fal;
pub mod openai;
pub mod registry;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use dispatcher::ProviderDispatcher;
pub use registry::ProviderRegistry;
pub use traits::{CopilotProvider, GenerateOptions};
pub use util::resolve_api_key;
