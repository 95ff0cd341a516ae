//! chatrelay - OpenAI-compatible gateway over ChatGPT, Grok, OpenRouter and Qwen
//!
//! A local proxy that speaks the OpenAI chat and text completion API and
//! forwards each request to one of several upstream chat backends.

use anyhow::Context;
use chatrelay::config::{BackendKind, Config, KeySource};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "OpenAI-compatible gateway over ChatGPT, Grok, OpenRouter and Qwen")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Override the default backend (chatgpt, grok, openrouter, qwen)
        #[arg(short, long)]
        provider: Option<BackendKind>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatrelay={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load(path: &str) -> anyhow::Result<(Config, Vec<(String, KeySource)>)> {
    Config::from_file_with_env(path).with_context(|| format!("Failed to load configuration from {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            provider,
        } => {
            let (mut cfg, sources) = load(&config)?;
            init_tracing(&cfg.logging.level);
            tracing::info!(config = %config, "Loaded configuration");
            for (slot, source) in &sources {
                tracing::debug!(slot = %slot, source = %source, "Credential source");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }
            if let Some(kind) = provider {
                tracing::info!(provider = %kind, "Override default backend");
                cfg.server.default_backend = kind;
            }

            chatrelay::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, sources) = load(&config)?;
            init_tracing(&cfg.logging.level);
            cfg.load_base_instructions()?;

            println!("Configuration OK: {}", config);
            println!("  listen:          {}", cfg.server.listen);
            println!("  default backend: {}", cfg.server.default_backend);
            println!(
                "  admission:       max_concurrency={} queue_limit={} rate_limit_rps={}",
                cfg.admission.max_concurrency, cfg.admission.queue_limit, cfg.admission.rate_limit_rps
            );
            for (slot, source) in sources {
                println!("  {:<22} {}", slot, source);
            }
            Ok(())
        }
    }
}
