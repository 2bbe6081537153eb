//! # repo-chat CLI
//!
//! The `repo-chat` binary starts the chat web app or runs a one-shot
//! question against freshly loaded repositories.
//!
//! ## Usage
//!
//! ```bash
//! repo-chat --config ./config/repo-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `repo-chat serve` | Start the chat web app |
//! | `repo-chat ask --repo <owner/name> "<question>"` | Load repositories, ask once, print the answer |
//!
//! ## Examples
//!
//! ```bash
//! # Serve on the configured address (default 127.0.0.1:8501)
//! repo-chat serve
//!
//! # Serve on another port
//! repo-chat serve --bind 0.0.0.0:9000
//!
//! # One-shot question
//! repo-chat ask --repo octocat/Hello-World "What does this repo do?"
//! ```
//!
//! Both commands need `GITHUB_TOKEN`, read from the secrets file named in
//! `[secrets].path` or from the environment.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repo_chat::config::{self, Config};
use repo_chat::credentials::{self, GithubToken};
use repo_chat::github::{GithubLoader, RepositoryLoader};
use repo_chat::knowledge_base::KnowledgeBase;
use repo_chat::server;
use repo_chat::session::{NoticeLevel, SessionState};

const DEFAULT_CONFIG_PATH: &str = "./config/repo-chat.toml";

/// Chat with GitHub repositories using a local Ollama model.
#[derive(Parser)]
#[command(
    name = "repo-chat",
    about = "Chat with GitHub repositories using a local Ollama model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/repo-chat.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat web app.
    Serve {
        /// Address to bind, overriding `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Load repositories, ask one question and print the answer.
    Ask {
        /// Repository to load, as `owner/name`. Repeatable.
        #[arg(long = "repo", required = true)]
        repos: Vec<String>,

        /// The question to ask.
        question: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let allow_missing = cli.config == Path::new(DEFAULT_CONFIG_PATH);
    let cfg = config::load_or_default(&cli.config, allow_missing)?;

    // Nothing touches the network until a token is in hand.
    let token = match credentials::resolve_from_path(&cfg.secrets.path) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let kb = Arc::new(KnowledgeBase::from_config(&cfg).await?);
    println!("Created vector store at {}", kb.store().dir().display());
    tracing::info!(
        llm = kb.llm_model(),
        embedder = kb.embedder_model(),
        "knowledge base ready"
    );

    match cli.command {
        Commands::Serve { bind } => {
            server::run_server(&cfg, kb, token, bind).await?;
        }
        Commands::Ask { repos, question } => {
            run_ask(&cfg, &kb, token, &repos, &question).await?;
        }
    }

    Ok(())
}

async fn run_ask(
    cfg: &Config,
    kb: &KnowledgeBase,
    token: GithubToken,
    repos: &[String],
    question: &str,
) -> anyhow::Result<()> {
    let loader: Arc<dyn RepositoryLoader> = Arc::new(GithubLoader::new(token, &cfg.github)?);
    let mut session = SessionState::new(loader);

    for repo in repos {
        session.load_repo(kb, repo).await;
    }
    for notice in session.take_notices() {
        match notice.level {
            NoticeLevel::Error => eprintln!("{}", notice.message),
            _ => println!("{}", notice.message),
        }
    }

    if !session.ask(kb, question).await? {
        anyhow::bail!("question must not be empty");
    }
    if let Some(reply) = session.chat_history().last() {
        println!();
        println!("{}", reply.content);
    }
    Ok(())
}
