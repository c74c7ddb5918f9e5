use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cp_gateway::cli::chat::ChatIdentity;
use cp_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Chat {
            workspace,
            principal,
            provider,
            log_json,
        } => {
            if log_json {
                init_tracing();
            } else {
                init_cli_tracing();
            }
            let (config, config_path) = cp_gateway::cli::load_config()?;
            tracing::info!(config = %config_path, "copilot starting");
            let identity = ChatIdentity {
                principal: principal.unwrap_or_else(cp_gateway::cli::default_principal),
                workspace,
                provider,
            };
            cp_gateway::cli::chat::chat(config, identity).await
        }
        Command::Config(ConfigCommand::Validate) => {
            init_cli_tracing();
            let (config, config_path) = cp_gateway::cli::load_config()?;
            if !cp_gateway::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cp_gateway::cli::load_config()?;
            cp_gateway::cli::config::show(&config)
        }
        Command::Providers => {
            init_cli_tracing();
            let (config, _) = cp_gateway::cli::load_config()?;
            cp_gateway::cli::providers::list(&config)
        }
        Command::Version => {
            println!("copilot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for long-running sessions, written to stderr so
/// replies on stdout stay clean.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cp_gateway=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Compact stderr-only tracing for one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
