use serde::{Deserialize, Serialize};

/// Capabilities of the host server the copilot feature plugs into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    /// The host exposes its GraphQL API surface. The copilot feature only
    /// activates when this is set.
    #[serde(default = "d_true")]
    pub graphql: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            graphql: true,
        }
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_true() -> bool {
    true
}
