use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use hearth::agent::Agent;
use hearth::engines::ollama::OllamaEngine;
use hearth::session::RuntimeSession;
use hearth::tools::ToolRegistry;
use tracing_subscriber::filter::LevelFilter;

mod configuration;
mod error;
mod prompt;
mod render;
mod session;

use configuration::Settings;
use prompt::rustyline::RustylinePrompt;
use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/hearth/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with a local model
    Chat {
        /// Model to load (overrides engine.model)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Send a single message and print the answer
    Run {
        /// The message to send
        #[arg(short, long)]
        text: String,

        /// Model to load (overrides engine.model)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// List the models available to the local engine
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&settings.log.level)?;
    let engine = OllamaEngine::new(settings.engine_config())?;

    match cli.command {
        Command::Models => {
            let models = engine
                .list_models()
                .await
                .with_context(|| format!("Could not reach the engine at {}", settings.engine.host))?;
            if models.is_empty() {
                println!("{}", style("No models installed yet.").dim());
            }
            for model in models {
                println!("{}", model);
            }
        }
        Command::Chat { model } => {
            let model = settings.model(model)?;
            let mut session = build_session(&settings, engine);
            session.select_model(&model).await?;
            let mut prompt = RustylinePrompt::new()?;
            session.start(&mut prompt).await?;
        }
        Command::Run { text, model } => {
            let model = settings.model(model)?;
            let mut session = build_session(&settings, engine);
            session.select_model(&model).await?;
            session.headless_start(&text).await?;
        }
    }
    Ok(())
}

fn build_session(settings: &Settings, engine: OllamaEngine) -> Session {
    let runtime = RuntimeSession::new(Arc::new(engine)).with_init_timeout(settings.init_timeout());
    let agent = Agent::new(Arc::new(runtime), ToolRegistry::with_builtin_tools())
        .with_system_prompt(settings.system_prompt())
        .with_limits(settings.limits());
    Session::new(agent)
}

fn init_logging(level: &str) -> Result<()> {
    let level: LevelFilter = level
        .parse()
        .with_context(|| format!("Invalid log level: {}", level))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
    Ok(())
}
