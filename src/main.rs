//! cclaw binary: configuration, provider selection, channel startup.
//!
//! Exit codes: 0 on a normal run, 1 on a fatal startup error (missing
//! credential).  Once a channel is running, errors are recovered locally
//! and never tear the process down.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use cclaw::cclaw::agent_loop::AgentContext;
use cclaw::cclaw::channels;
use cclaw::cclaw::config::{Config, ProviderKind};
use cclaw::cclaw::http_client::HttpClient;
use cclaw::cclaw::memory::Memory;
use cclaw::cclaw::provider::ProviderClient;
use cclaw::cclaw::providers::anthropic::AnthropicClient;
use cclaw::cclaw::providers::openai::OpenAIClient;
use cclaw::cclaw::scheduler::Scheduler;
use cclaw::cclaw::tools::ToolRegistry;
use cclaw::cclaw::workspace;

#[derive(Parser)]
#[command(
    name = "cclaw",
    about = "Tool-using conversational agent with terminal, Telegram, and WebSocket front-ends"
)]
struct Cli {
    /// One-shot prompt; omit to start the interactive terminal.
    prompt: Option<String>,

    /// Configuration file (key=value lines).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Workspace directory (identity files and session storage).
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Model identifier override.
    #[arg(long, value_name = "NAME")]
    model: Option<String>,

    /// Run the Telegram channel as the primary channel.
    #[arg(long)]
    telegram: bool,

    /// WebSocket gateway port (0 disables).
    #[arg(long, value_name = "PORT")]
    gateway_port: Option<u16>,

    /// Print version.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    version: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.version {
        println!("cclaw {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let mut config = Config::load(cli.config.as_deref());
    if let Some(workspace) = cli.workspace {
        config.workspace = workspace;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.telegram {
        config.telegram_enabled = true;
    }
    if let Some(port) = cli.gateway_port {
        config.gateway_port = port;
    }

    // RUST_LOG, when set, still overrides the configured level.
    env_logger::Builder::new()
        .filter_level(config.log_filter())
        .parse_default_env()
        .init();

    if config.api_key.is_empty() {
        eprintln!(
            "cclaw: no API key configured \
             (set api_key in the config file, or CCLAW_API_KEY / ANTHROPIC_API_KEY / OPENAI_API_KEY)"
        );
        std::process::exit(1);
    }

    let http = HttpClient::new();
    let provider: Arc<dyn ProviderClient> = match config.provider {
        ProviderKind::Anthropic => {
            Arc::new(AnthropicClient::new(http.clone(), config.api_key.clone()))
        }
        ProviderKind::OpenAI => Arc::new(OpenAIClient::new(http.clone(), config.api_key.clone())),
    };
    log::info!("provider: {} model: {}", provider.name(), config.model);

    let memory = config.memory_db.as_ref().and_then(|path| {
        match Memory::open(path) {
            Ok(memory) => Some(Arc::new(memory)),
            Err(e) => {
                log::error!("memory: cannot open {}: {}", path.display(), e);
                None
            }
        }
    });

    let registry = ToolRegistry::new(config.workspace.clone(), memory);
    let tools = registry.definitions();
    let system_prompt = workspace::system_prompt(&config.workspace);
    let running = Arc::new(AtomicBool::new(true));

    let ctx = Arc::new(AgentContext {
        config,
        provider,
        registry,
        system_prompt,
        tools,
        running: running.clone(),
    });

    spawn_signal_handler(running.clone());

    // One-shot mode: answer and exit, no background services.
    if let Some(prompt) = cli.prompt {
        channels::cli::one_shot(&ctx, &prompt).await;
        return;
    }

    let mut scheduler = Scheduler::new(running.clone());
    if let Err(e) = scheduler.add(
        "heartbeat",
        "0 * * * *",
        Box::new(|| log::debug!("scheduler: hourly heartbeat")),
    ) {
        log::warn!("scheduler: cannot register heartbeat: {}", e);
    }
    let _scheduler_handle = scheduler.start();

    if ctx.config.gateway_port > 0 {
        tokio::spawn(channels::gateway::run(ctx.clone(), ctx.config.gateway_port));
    }

    if ctx.config.telegram_enabled {
        channels::telegram::run(ctx.clone()).await;
    } else {
        channels::cli::interactive(&ctx).await;
    }

    running.store(false, Ordering::Relaxed);
}

/// Flip the shared running flag on SIGINT or SIGTERM.
fn spawn_signal_handler(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    log::warn!("signals: cannot install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    running.store(false, Ordering::Relaxed);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        log::info!("signal received, shutting down");
        running.store(false, Ordering::Relaxed);
    });
}
