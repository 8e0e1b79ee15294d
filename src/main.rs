//! mediagram CLI entry point

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mediagram::adapters::cli::{CliCallbacks, CliChannel};
use mediagram::adapters::telegram::TelegramChannel;
use mediagram::adapters::Channel;
use mediagram::agent::{Agent, AnthropicProvider, Runtime};
use mediagram::config::{self, Config};
use mediagram::media::MediaManager;
use mediagram::mgtools::MgtoolsCommand;
use mediagram::tools::{ToolContext, ToolRegistry};

#[derive(Parser)]
#[command(name = "mediagram")]
#[command(about = "🎞  mediagram - media agent for the terminal and Telegram")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mediagram in CLI or Telegram mode
    Run {
        #[command(subcommand)]
        mode: RunMode,
    },

    /// Run one tool directly, printing its result
    Tool {
        /// Tool name; omit to list the available tools
        name: Option<String>,

        /// Working directory the tool is confined to
        #[arg(long, default_value = ".")]
        cwd: PathBuf,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Show tool arguments when the tool starts
        #[arg(long)]
        details: bool,
    },

    /// Interactive setup wizard
    Onboard,

    /// JSON-lines wrappers around external media programs
    #[command(hide = true)]
    Mgtools {
        #[command(subcommand)]
        command: MgtoolsCommand,
    },
}

#[derive(Subcommand)]
enum RunMode {
    /// Chat in the terminal
    Cli {
        #[command(flatten)]
        options: RunOptions,

        /// Messages to send instead of reading from stdin
        messages: Vec<String>,
    },

    /// Serve a Telegram bot
    Telegram {
        #[command(flatten)]
        options: RunOptions,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Model alias (haiku, sonnet)
    #[arg(long)]
    model: Option<String>,

    /// Root directory for conversation media
    #[arg(long)]
    media_dir: Option<PathBuf>,

    /// Maximum autonomous turns per message, 0 for unlimited
    #[arg(long)]
    turns: Option<usize>,

    /// Maximum characters of tool output shown to the model
    #[arg(long)]
    tool_limit: Option<usize>,

    /// Show tool arguments when tools start
    #[arg(long)]
    tool_details: bool,
}

impl RunOptions {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(dir) = self.media_dir {
            config.media_dir = Some(dir);
        }
        if let Some(turns) = self.turns {
            config.max_turns = turns;
        }
        if let Some(limit) = self.tool_limit {
            config.tool_output_limit = limit;
        }
        if self.tool_details {
            config.tool_details = true;
        }
        config.validate()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries replies and helper JSON lines.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli.command).await {
        mediagram::ui::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Mgtools { command } => {
            let code = mediagram::mgtools::run(command).await;
            std::process::exit(code);
        }

        Commands::Onboard => {
            config::load_environment();
            config::onboard()?;
        }

        Commands::Tool { name, cwd, args, details } => {
            config::load_environment();
            let config = config::load()?;
            run_tool(&config, name.as_deref(), cwd, &args, details).await?;
        }

        Commands::Run { mode } => {
            config::load_environment();
            let mut config = config::load()?;

            match mode {
                RunMode::Cli { options, messages } => {
                    options.apply(&mut config)?;
                    install_ctrlc_handler();
                    run_cli(config, messages).await?;
                }
                RunMode::Telegram { options } => {
                    options.apply(&mut config)?;
                    let runtime = build_runtime(&config)?;
                    let channel = TelegramChannel::new(config, runtime)?;
                    println!("✓ Listening for Telegram messages...");
                    channel.start().await?;
                }
            }
        }
    }

    Ok(())
}

/// First Ctrl+C warns, a second one within three seconds exits.
fn install_ctrlc_handler() {
    let exit_flag = Arc::new(AtomicBool::new(false));
    let r = exit_flag.clone();

    ctrlc::set_handler(move || {
        if r.load(Ordering::SeqCst) {
            println!("\n👋 Bye!");
            std::process::exit(0);
        } else {
            println!("\n⚠️  Press Ctrl+C again to exit");
            r.store(true, Ordering::SeqCst);

            let r2 = r.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_secs(3));
                r2.store(false, Ordering::SeqCst);
            });
        }
    })
    .ok();
}

fn build_runtime(config: &Config) -> Result<Arc<Runtime>> {
    let provider = Arc::new(AnthropicProvider::from_config(config)?);
    let tools = ToolRegistry::with_builtins(config);
    Ok(Arc::new(Runtime::new(provider, tools)))
}

async fn run_cli(config: Config, messages: Vec<String>) -> Result<()> {
    let runtime = build_runtime(&config)?;
    let media = Arc::new(MediaManager::create(config.media_dir.as_deref())?);
    let agent = Agent::new(runtime, media, &config)?.with_callbacks(Arc::new(CliCallbacks::default()));

    let channel = CliChannel::new(agent, CliChannel::local_user()).with_messages(messages);
    channel.start().await?;
    Ok(())
}

async fn run_tool(config: &Config, name: Option<&str>, cwd: PathBuf, args: &str, details: bool) -> Result<()> {
    let registry = ToolRegistry::with_builtins(config);

    let Some(name) = name else {
        println!("Available tools:");
        for tool in registry.iter() {
            println!("  {}", tool.signature());
        }
        return Ok(());
    };
    if !registry.has(name) {
        anyhow::bail!("Unknown tool: {name}. Available: {}", registry.tool_names().join(", "));
    }

    let args: serde_json::Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    let cwd = cwd
        .canonicalize()
        .with_context(|| format!("Working directory {} does not exist", cwd.display()))?;
    let ctx = ToolContext::new(cwd)
        .with_output_limit(config.tool_output_limit)
        .with_details(details)
        .with_callbacks(Arc::new(CliCallbacks::default()));

    let result = ctx.clone().scope(registry.invoke(name, args, &ctx)).await;
    println!("{result}");
    Ok(())
}
