//! Edge Operator CLI - industrial assistant on a local model with cloud fallback

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edge_operator::{
    agent::{router_from_config, EdgeOperator, TurnError},
    config::Config,
    router::ModelMode,
    session::{self, SessionStore},
    tools::{DeviceRegistry, ScadaExtractor},
    tui::InteractiveShell,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "edge-operator")]
#[command(about = "Industrial operations assistant with local and cloud model modes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session to use instead of the configured one
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Verbosity level
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive shell (default)
    Chat,

    /// Ask a single question and print the answer
    Ask {
        /// The message to send
        message: Vec<String>,

        /// Switch to cloud mode first
        #[arg(long)]
        cloud: bool,
    },

    /// Check both backends and report reachability
    Probe,

    /// Show stored conversation turns
    History {
        /// Number of turns to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// List all sessions instead
        #[arg(long)]
        list: bool,
    },

    /// List the simulated devices
    Devices,

    /// Extract production metrics from a SCADA report
    Extract {
        /// Report file
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show only one section (local, cloud, router, session, telemetry, documents)
        #[arg(long)]
        section: Option<String>,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    let explicit_config = cli.config.clone();
    let session = cli.session.clone();
    let settings = || -> Result<Config> {
        let mut config = load_config(explicit_config.as_deref())?;
        if let Some(id) = &session {
            config.session.session_id = id.clone();
        }
        Ok(config)
    };

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&settings()?).await?,
        Commands::Ask { message, cloud } => run_ask(&settings()?, &message.join(" "), cloud).await?,
        Commands::Probe => run_probe(&settings()?).await?,
        Commands::History { limit, list } => run_history(&settings()?, limit, list).await?,
        Commands::Devices => println!("{}", DeviceRegistry::with_defaults().describe()),
        Commands::Extract { file, json } => run_extract(&file, json).await?,
        Commands::Config(cmd) => run_config_command(cmd, &config_path)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_existing(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

async fn run_chat(config: &Config) -> Result<()> {
    let agent = EdgeOperator::from_config(config).await?;
    let mut shell = InteractiveShell::new(agent);
    shell.run().await
}

async fn run_ask(config: &Config, message: &str, cloud: bool) -> Result<()> {
    if message.trim().is_empty() {
        bail!("Nothing to ask. Usage: edge-operator ask <message>");
    }

    let agent = EdgeOperator::from_config(config).await?;
    if cloud {
        if let Err(e) = agent.set_model_mode(ModelMode::Cloud).await {
            eprintln!("Warning: {}. Answering in local mode.", e);
        }
    }

    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let result = agent
        .stream_chat(
            message,
            |delta| {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            },
            cancel,
        )
        .await;
    println!();

    match result {
        Ok(outcome) => {
            info!(
                mode = %outcome.mode,
                prompt_tokens = outcome.usage.prompt_tokens,
                completion_tokens = outcome.usage.completion_tokens,
                "Answered"
            );
            Ok(())
        }
        Err(TurnError::Cancelled { .. }) => bail!("Cancelled"),
        Err(e) => Err(e.into()),
    }
}

async fn run_probe(config: &Config) -> Result<()> {
    let router = router_from_config(config)?;

    println!("Backends:");
    let mut local_ok = true;
    for health in router.check_backends().await {
        let state = if health.reachable {
            format!("reachable ({} ms)", health.latency.as_millis())
        } else {
            if health.mode == ModelMode::Local {
                local_ok = false;
            }
            health.detail.unwrap_or_else(|| "unreachable".to_string())
        };
        println!(
            "  {:<6} {} ({}): {}",
            health.mode.as_str(),
            health.name,
            health.model,
            state
        );
    }

    if !config.has_cloud_key() {
        println!();
        println!(
            "No cloud API key. Set {} or EDGE_CLOUD_API_KEY to enable cloud mode.",
            config.cloud.provider.api_key_env()
        );
    }
    if !local_ok {
        println!();
        println!("Local model server not running? Start it with:");
        println!("  ollama serve && ollama pull {}", config.local.model);
    }

    Ok(())
}

async fn run_history(config: &Config, limit: usize, list: bool) -> Result<()> {
    let dir = &config.session.storage_dir;

    if list {
        let sessions = session::list_sessions(dir).await?;
        if sessions.is_empty() {
            println!("No sessions in {}", dir.display());
        }
        for meta in sessions {
            println!(
                "{:<24} {:>5} turns  last active {}",
                meta.id,
                meta.turn_count,
                meta.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    }

    let id = &config.session.session_id;
    if !session::exists(dir, id).await? {
        println!("Session '{}' has no history yet.", id);
        return Ok(());
    }

    let store = SessionStore::open(dir, id).await?;
    for turn in store.recent(limit).await? {
        let speaker = match turn.mode {
            Some(mode) => format!("{:?}/{}", turn.role, mode),
            None => format!("{:?}", turn.role),
        };
        println!(
            "[{}] {}: {}",
            turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
            speaker.to_lowercase(),
            turn.content
        );
    }
    println!();
    print!("{}", store.stats().await?);

    Ok(())
}

async fn run_extract(file: &Path, json: bool) -> Result<()> {
    let report = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let metrics = ScadaExtractor::new()?.extract(&report)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        println!("{}", metrics);
    }
    Ok(())
}

fn run_config_command(cmd: ConfigCommands, path: &Path) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => config_init(path, force)?,
        ConfigCommands::Show { section } => config_show(path, section)?,
        ConfigCommands::Path => config_path(path),
        ConfigCommands::Validate => config_validate(path)?,
    }
    Ok(())
}

fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    Config::default().save_to(path)?;

    println!("Configuration file created at: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Start Ollama and pull the local model:");
    println!("     ollama pull {}", Config::default().local.model);
    println!("  2. For cloud mode, set an API key:");
    println!("     export ANTHROPIC_API_KEY=your_key");
    println!("  3. Run: edge-operator chat");

    Ok(())
}

fn config_show(path: &Path, section: Option<String>) -> Result<()> {
    let mut config = Config::load_from(path)?;
    if config.cloud.api_key.is_some() {
        config.cloud.api_key = Some("***".to_string());
    }

    let display = match section.as_deref().map(str::to_lowercase).as_deref() {
        None => toml::to_string_pretty(&config)?,
        Some("local") => toml::to_string_pretty(&config.local)?,
        Some("cloud") => toml::to_string_pretty(&config.cloud)?,
        Some("router") => toml::to_string_pretty(&config.router)?,
        Some("session") => toml::to_string_pretty(&config.session)?,
        Some("telemetry") => toml::to_string_pretty(&config.telemetry)?,
        Some("documents") => toml::to_string_pretty(&config.documents)?,
        Some(other) => {
            println!("Unknown section: {}", other);
            println!("Available: local, cloud, router, session, telemetry, documents");
            return Ok(());
        }
    };

    println!("{}", display);

    println!("\n--- Environment Variables ---");
    for name in [
        "EDGE_CLOUD_API_KEY",
        "ANTHROPIC_API_KEY",
        "OPENAI_API_KEY",
        "OLLAMA_URL",
        "OLLAMA_MODEL",
        "EDGE_SESSION_ID",
    ] {
        let state = if std::env::var(name).is_ok() { "set" } else { "not set" };
        println!("{}: {}", name, state);
    }

    Ok(())
}

fn config_path(path: &Path) {
    println!("{}", path.display());

    if path.exists() {
        println!("(file exists)");
    } else {
        println!("(file does not exist - run 'config init' to create)");
    }
}

fn config_validate(path: &Path) -> Result<()> {
    let config = Config::load_from(path)?;

    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid!");
            println!();
            println!("  Local:  {} (model: {})", config.local.url, config.local.model);
            let key = if config.has_cloud_key() { "key set" } else { "NO API KEY" };
            println!(
                "  Cloud:  {} (model: {}, {})",
                config.cloud.provider, config.cloud.model, key
            );
            println!(
                "  Session: {} in {}",
                config.session.session_id,
                config.session.storage_dir.display()
            );
        }
        Err(e) => {
            println!("Configuration validation failed:");
            println!("  {}", e);
        }
    }

    Ok(())
}
