use aytchmcp::config::{Config, ConfigOverrides};
use aytchmcp::prompts::PromptLibrary;
use aytchmcp::{resources, tools, McpServer};
use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server
    Start(StartArgs),
    /// Initialize a new configuration directory
    Init {
        /// Directory to create configuration in
        #[arg(long, default_value = "./config")]
        dir: PathBuf,
    },
    /// List available resources
    ListResources,
    /// List available tools
    ListTools,
    /// List prompt templates from the configured prompts directory
    ListPrompts {
        /// Path to the configuration directory or file
        #[arg(long)]
        config: Option<String>,
    },
    /// Show version information
    Version,
}

#[derive(Args)]
struct StartArgs {
    /// Host to bind the server to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the server to
    #[arg(long)]
    port: Option<u16>,

    /// Path to the configuration directory or file
    #[arg(long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable debug mode
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => start(args).await,
        Commands::Init { dir } => {
            init_logging("info", false)?;
            let written = Config::init_dir(&dir)
                .with_context(|| format!("Failed to initialize configuration in {}", dir.display()))?;
            println!("Initialized configuration in {} ({} files written)", dir.display(), written.len());
            Ok(())
        }
        Commands::ListResources => {
            println!("Available resources:");
            for name in resources::AVAILABLE_RESOURCES {
                println!("  - {}", name);
            }
            Ok(())
        }
        Commands::ListTools => {
            println!("Available tools:");
            for name in tools::AVAILABLE_TOOLS {
                println!("  - {}", name);
            }
            Ok(())
        }
        Commands::ListPrompts { config } => {
            init_logging("warn", false)?;
            let config = Config::load(config.as_deref(), &ConfigOverrides::default())?;
            let library = PromptLibrary::load(&config.prompts_dir(), config.prompts.builtins);
            println!("Available prompts:");
            for name in library.names() {
                println!("  - {}", name);
            }
            Ok(())
        }
        Commands::Version => {
            println!("AytchMCP version: {}", aytchmcp::VERSION);
            Ok(())
        }
    }
}

async fn start(args: StartArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        host: args.host,
        port: args.port,
        log_level: args.log_level.clone(),
        debug: args.debug,
    };

    // The configured level decides the filter; a failed load still gets logged
    let loaded = Config::load(args.config.as_deref(), &overrides);
    let level = match &loaded {
        Ok(config) => config.effective_log_level(),
        Err(_) => args.log_level.clone().unwrap_or_else(|| "info".to_string()),
    };
    init_logging(&level, args.json_logs)?;

    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let location = Config::resolve_path(args.config.as_deref());
    let server = McpServer::from_config(&config)
        .map_err(|e| {
            error!("Startup failed: {}", e);
            e
        })?
        .with_hot_reload(location, overrides);

    server.start().await?;
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}
