//! hive 命令行入口
//!
//! 子命令：run（新会话）、resume（恢复会话）、todos（查看会话待办）、agents（列出可用 Agent）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hive::agents::{AgentResolver, MarkdownAgentSource};
use hive::config::{load_config, AppConfig, StorageKind};
use hive::core::{
    run_with_graceful_shutdown, AgentExecutor, ExecutorParts, RunOutcome, ShutdownCoordinator,
    ShutdownManager, StorageFlush,
};
use hive::llm::OpenAiCompatibleFactory;
use hive::session::{
    recover_session, EventHub, FileStorage, MemoryStorage, NoopStorage, SessionStorage,
};
use hive::tools::builtin_registry;

#[derive(Parser)]
#[command(name = "hive", version, about = "Run agents with delegation, safety limits and resumable sessions")]
struct Cli {
    /// Config file layered over config/default.toml
    #[arg(short, long, global = true, env = "HIVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent on a prompt in a new session.
    Run {
        agent: String,
        prompt: String,
        /// Session id (random when omitted)
        #[arg(long)]
        session: Option<String>,
    },
    /// Resume a session, finishing interrupted tool calls first.
    Resume {
        session: String,
        #[arg(long, default_value = "default")]
        agent: String,
        /// Follow-up prompt appended after the recovered history
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Print the latest todo list of a session.
    Todos { session: String },
    /// List available agents.
    Agents,
}

#[tokio::main]
async fn main() {
    hive::observability::init();
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config).context("load config")?;
    let storage = build_storage(&config)?;

    match cli.command {
        Command::Run {
            agent,
            prompt,
            session,
        } => {
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let (executor, coordinator) = build_executor(&config, storage).await;
            let outcome = run_with_graceful_shutdown(&coordinator, async {
                executor.run(&agent, &prompt, &session_id).await
            })
            .await?;
            print_outcome(&session_id, &outcome);
        }
        Command::Resume {
            session,
            agent,
            prompt,
        } => {
            let (executor, coordinator) = build_executor(&config, storage).await;
            let outcome = run_with_graceful_shutdown(&coordinator, async {
                executor.resume(&session, &agent, prompt.as_deref()).await
            })
            .await?;
            print_outcome(&session, &outcome);
        }
        Command::Todos { session } => {
            let recovered = recover_session(storage.as_ref(), &session)
                .await?
                .with_context(|| format!("session not found: {session}"))?;
            if recovered.todos.is_empty() {
                println!("(no todos)");
            }
            for todo in &recovered.todos {
                println!("[{:?}] {} ({})", todo.status, todo.content, todo.id);
            }
        }
        Command::Agents => {
            let resolver = AgentResolver::new(Arc::new(MarkdownAgentSource::new(
                &config.agents.directory,
            )));
            for name in resolver.list_agents().await {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn build_storage(config: &AppConfig) -> Result<Arc<dyn SessionStorage>> {
    let storage: Arc<dyn SessionStorage> = match config.session.storage {
        StorageKind::Noop => Arc::new(NoopStorage),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
        StorageKind::Filesystem => {
            std::fs::create_dir_all(&config.session.dir).with_context(|| {
                format!("create session dir {}", config.session.dir.display())
            })?;
            Arc::new(FileStorage::new(&config.session.dir))
        }
    };
    Ok(storage)
}

async fn build_executor(
    config: &AppConfig,
    storage: Arc<dyn SessionStorage>,
) -> (Arc<AgentExecutor>, ShutdownCoordinator) {
    let resolver = AgentResolver::new(Arc::new(MarkdownAgentSource::new(
        &config.agents.directory,
    )));
    let agents = resolver.list_agents().await;
    let factory = OpenAiCompatibleFactory::new(
        config.llm.base_url.clone(),
        config.llm.api_key_env.clone(),
        config.models.default_model.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    );

    let shutdown = ShutdownManager::new();
    let mut coordinator = ShutdownCoordinator::new(shutdown.clone());
    coordinator.register(StorageFlush::new(Arc::clone(&storage)));

    let executor = AgentExecutor::new(ExecutorParts {
        resolver,
        registry: Arc::new(builtin_registry(&agents)),
        factory: Arc::new(factory),
        storage,
        hub: Arc::new(EventHub::new()),
        safety: config.safety,
        dispatch: config.tools.dispatch_config(),
        shutdown,
    });
    (executor, coordinator)
}

fn print_outcome(session_id: &str, outcome: &RunOutcome) {
    println!("{}", outcome.result);
    eprintln!(
        "session={} iterations={} model_calls={} prompt_tokens={} completion_tokens={} total_tokens={}",
        session_id,
        outcome.iterations,
        outcome.usage.model_calls,
        outcome.usage.prompt_tokens,
        outcome.usage.completion_tokens,
        outcome.usage.total_tokens,
    );
}
