pub mod chat;
pub mod config;
pub mod providers;

use clap::{Parser, Subcommand};

/// copilot: multi-provider AI chat with resumable streams.
#[derive(Debug, Parser)]
#[command(name = "copilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat interactively with a provider.
    Chat {
        /// Workspace the session belongs to.
        #[arg(long, default_value = "default")]
        workspace: String,
        /// Principal the turns are charged to (defaults to $USER).
        #[arg(long)]
        principal: Option<String>,
        /// Provider override; otherwise the configured default.
        #[arg(long)]
        provider: Option<String>,
        /// Emit structured JSON logs (RUST_LOG, default info) to stderr.
        #[arg(long)]
        log_json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// List registered providers and whether their configuration validated.
    Providers,
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `CP_CONFIG` (or `copilot.toml`
/// by default). A missing file yields the defaults. Returns the parsed
/// [`Config`](cp_domain::config::Config) and the path that was used.
pub fn load_config() -> anyhow::Result<(cp_domain::config::Config, String)> {
    let config_path = std::env::var("CP_CONFIG").unwrap_or_else(|_| "copilot.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        cp_domain::config::Config::default()
    };

    Ok((config, config_path))
}

/// Principal for CLI sessions when none is given.
pub fn default_principal() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "local".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::parse_from([
            "copilot",
            "chat",
            "--workspace",
            "docs",
            "--provider",
            "fal",
        ]);
        match cli.command {
            Command::Chat {
                workspace,
                principal,
                provider,
                log_json,
            } => {
                assert!(!log_json);
                assert_eq!(workspace, "docs");
                assert!(principal.is_none());
                assert_eq!(provider.as_deref(), Some("fal"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_config_subcommands() {
        let cli = Cli::parse_from(["copilot", "config", "validate"]);
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Validate)));
    }
}
