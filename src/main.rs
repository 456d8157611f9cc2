mod api;
mod config;
mod conversation;
mod llm;
mod memory;
mod prompt;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;

use config::Config;
use conversation::Conversation;
use memory::{MemoryStore, Role, Turn};
use prompt::PromptSet;
use storage::{FileStore, KvStore, MemoryKv};

#[derive(Parser)]
#[command(
    name = "kioku",
    version,
    about = "Chat with a model that remembers the conversation"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.kioku/config.toml", env = "KIOKU_CONFIG")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config directory, prompts and a default config.toml
    Init,
    /// Send one message, or start an interactive session when omitted
    Chat {
        message: Option<String>,
        /// Keep memory in this process only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Print the remembered conversation
    History,
    /// Forget the conversation
    Clear,
    /// Serve the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Chat {
        message: None,
        ephemeral: false,
    }) {
        Commands::Init => {
            let base = config_base_dir(&cli.config);
            config::init_config_dir(&base).await?;
            tracing::info!("Initialized {}", base.display());
        }
        Commands::Chat { message, ephemeral } => {
            let cfg = config::load(&cli.config)?;
            let conversation = build_conversation(&cfg, ephemeral)?;
            chat(&conversation, message.as_deref()).await?;
        }
        Commands::History => {
            let cfg = config::load(&cli.config)?;
            let memory = open_memory(&cfg, false);
            print_transcript(&memory.snapshot());
        }
        Commands::Clear => {
            let cfg = config::load(&cli.config)?;
            open_memory(&cfg, false).clear();
            tracing::info!("Chat memory cleared");
        }
        Commands::Serve => serve(&cli.config).await?,
    }
    Ok(())
}

fn config_base_dir(config_path: &str) -> PathBuf {
    config::expand_tilde(config_path)
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_dir)
}

fn open_memory(cfg: &Config, ephemeral: bool) -> MemoryStore {
    let storage: Arc<dyn KvStore> = if ephemeral {
        Arc::new(MemoryKv::new())
    } else {
        Arc::new(FileStore::new(cfg.memory.store_dir()))
    };
    MemoryStore::load(storage, cfg.memory.key.clone())
}

fn build_conversation(cfg: &Config, ephemeral: bool) -> Result<Conversation> {
    let memory = open_memory(cfg, ephemeral);
    let prompts = PromptSet::from_config(&cfg.prompts, &cfg.memory.base_dir)?;
    let llm = llm::create_client(&cfg.llm)?;
    if llm.is_none() {
        tracing::warn!(
            "API key missing! Set [llm] api_key or the {} environment variable.",
            cfg.llm.api_key_env()
        );
    }
    tracing::info!(
        "Using {} / {} with {} remembered turns",
        cfg.llm.provider,
        cfg.llm.model,
        memory.len()
    );
    Ok(Conversation::new(llm, memory, prompts))
}

async fn serve(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;
    if cfg.api.api_key.is_none() {
        if is_localhost(&cfg.api.bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{}'. Set [api] api_key.",
                cfg.api.bind
            );
        }
    }

    let state = api::AppState {
        conversation: Arc::new(build_conversation(&cfg, false)?),
        api_key: cfg.api.api_key.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.api.bind).await?;
    tracing::info!("kioku listening on {}", cfg.api.bind);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

async fn chat(conversation: &Conversation, message: Option<&str>) -> Result<()> {
    if let Some(msg) = message {
        match conversation.ask_turn(msg).await {
            Ok(reply) => println!("{reply}"),
            Err(e) => anyhow::bail!("{e}"),
        }
        return Ok(());
    }
    // Interactive REPL
    let stdin = std::io::stdin();
    loop {
        eprint!("kioku> ");
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "exit" | "quit" => break,
            "/clear" => {
                conversation.clear_memory().await;
                eprintln!("(memory cleared)");
            }
            "/history" => print_transcript(&conversation.transcript().await),
            _ => match conversation.ask_turn(line).await {
                Ok(text) => println!("\n{text}\n"),
                Err(e) => eprintln!("Error: {e}"),
            },
        }
    }
    Ok(())
}

fn print_transcript(turns: &[Turn]) {
    if turns.is_empty() {
        println!("(no conversation yet)");
        return;
    }
    for turn in turns {
        let speaker = match turn.role {
            Role::User => "You",
            Role::Model => "AI",
        };
        println!("{speaker}: {}", turn.content);
    }
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
