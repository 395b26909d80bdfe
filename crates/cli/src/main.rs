use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use switchyard_gateway::Gateway;

#[derive(Parser)]
#[command(name = "switchyard", about = "Switchyard — agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Explicit config file (overrides discovery).
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Load and validate the config, then exit.
    CheckConfig,
    /// Print the config path that would be used.
    ConfigPath,
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("switchyard={0},switchyard_gateway={0}", cli.log_level)));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<switchyard_config::GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => switchyard_config::load_config(path)?,
        None => switchyard_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        None | Some(Commands::Serve) => serve(&cli).await,
        Some(Commands::CheckConfig) => {
            let config = load_config(&cli)?;
            config.validate().map_err(|e| anyhow::anyhow!(e))?;
            println!("config ok");
            Ok(())
        },
        Some(Commands::ConfigPath) => {
            println!("{}", switchyard_config::find_or_default_config_path().display());
            Ok(())
        },
    }
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let gateway = Gateway::new(config)?;
    let listener = gateway.bind().await?;

    tokio::select! {
        result = gateway.serve(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            gateway.stop().await;
        },
    }
    Ok(())
}
