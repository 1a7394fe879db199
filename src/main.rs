//! cal-concierge CLI entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cal_concierge::cli::{expand_path, format_upcoming, run_chat};
use cal_concierge::gateway::{CheckAvailabilityRequest, Gateway, GatewayConfig, GatewayServer};

/// Conversational calendar assistant.
#[derive(Parser)]
#[command(name = "cal-concierge")]
#[command(about = "Book meetings and check availability by chatting.")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "CAL_CONCIERGE_CONFIG", default_value = "~/.cal-concierge/config.json")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides the config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Chat in the terminal
    Chat {
        /// Session identifier
        #[arg(short, long, default_value = "terminal")]
        session: String,
    },

    /// List upcoming events
    Upcoming {
        /// Calendar identifier (defaults to the configured one)
        #[arg(long)]
        calendar: Option<String>,

        /// Maximum number of events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show free slots on a day
    Slots {
        /// Day as YYYY-MM-DD
        date: String,

        /// Calendar identifier (defaults to the configured one)
        #[arg(long)]
        calendar: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current config
    Show,

    /// Validate config
    Validate,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(config: &GatewayConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    GatewayConfig::load_or_default(path)
        .with_context(|| format!("loading config from {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = expand_path(&cli.config);

    match cli.command {
        Commands::Serve { port, host } => {
            let mut config = load_config(&config_path)?;
            init_logging(&config, cli.verbose);
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }

            let gateway = Arc::new(Gateway::from_config(config)?);
            GatewayServer::new(gateway).start().await?;
        }

        Commands::Chat { session } => {
            let config = load_config(&config_path)?;
            init_logging(&config, cli.verbose);
            let gateway = Gateway::from_config(config)?;

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_chat(&gateway, &session, stdin, tokio::io::stdout()).await?;
        }

        Commands::Upcoming { calendar, limit } => {
            let config = load_config(&config_path)?;
            init_logging(&config, cli.verbose);
            let calendar_id = calendar.unwrap_or_else(|| config.calendar.default_calendar_id.clone());
            let limit = limit.unwrap_or(config.calendar.upcoming_limit);
            let gateway = Gateway::from_config(config)?;

            let events = gateway
                .engine()
                .calendar()
                .list_upcoming(&calendar_id, limit)
                .await
                .with_context(|| format!("listing events on {}", calendar_id))?;
            println!("{}", format_upcoming(&events));
        }

        Commands::Slots { date, calendar } => {
            let config = load_config(&config_path)?;
            init_logging(&config, cli.verbose);
            let gateway = Gateway::from_config(config)?;

            let result = gateway
                .check_availability(CheckAvailabilityRequest { date, calendar_id: calendar })
                .await;
            println!("{}", result.message);
        }

        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                let config = load_config(&config_path)?;
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigCommands::Validate => {
                let config = GatewayConfig::load(&config_path)?;
                config.validate()?;
                println!("{} is valid", config_path.display());
            }
            ConfigCommands::Init { force } => {
                if config_path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", config_path.display());
                }
                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                GatewayConfig::default().save(&config_path)?;
                println!("Wrote default config to {}", config_path.display());
                println!("Set GOOGLE_API_KEY and GOOGLE_CALENDAR_TOKEN before running `serve`.");
            }
        },
    }

    Ok(())
}
