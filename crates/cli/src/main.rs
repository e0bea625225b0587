mod account_commands;

use std::path::PathBuf;

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    wahub_config::WahubConfig,
};

#[derive(Parser)]
#[command(name = "wahub", about = "wahub, multi-account WhatsApp gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of the discovered one.
    #[arg(long, global = true, env = "WAHUB_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Account management.
    Accounts {
        #[command(subcommand)]
        action: account_commands::AccountAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file in use, if any.
    Path,
    /// Print the effective configuration.
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<WahubConfig> {
    match &cli.config {
        Some(path) => wahub_config::load_config(path),
        None => Ok(wahub_config::discover_and_load()),
    }
}

fn handle_config(
    explicit: Option<PathBuf>,
    config: &WahubConfig,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Path => {
            match explicit.or_else(wahub_config::find_config_file) {
                Some(path) => println!("{}", path.display()),
                None => println!("no config file found, using defaults"),
            }
            Ok(())
        },
        ConfigAction::Show => {
            let mut shown = config.clone();
            if shown.server.api_token.is_some() {
                shown.server.api_token = Some("********".into());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wahub starting");
    let mut config = load_config(&cli)?;
    let explicit_config = cli.config.clone();

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            wahub_gateway::start_gateway(config).await
        },
        Commands::Accounts { action } => {
            account_commands::handle_accounts(&config, action).await
        },
        Commands::Config { action } => handle_config(explicit_config, &config, action),
    }
}
