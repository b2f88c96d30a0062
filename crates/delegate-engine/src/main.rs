//! `delegate` CLI
//!
//! Runs one subagent from the command line and prints its result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use delegate_core::config::{load_config, personal_agents_dir, project_agents_dir};
use delegate_core::subagents::SubagentRegistry;
use delegate_engine::orchestration::{ProgressEvent, ProgressObserver};
use delegate_engine::{EngineContext, Orchestrator, ParentContext, SpawnRequest};

#[derive(Parser, Debug)]
#[command(name = "delegate")]
#[command(version, about = "delegate - run subagents as supervised child processes")]
struct Args {
    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, global = true, default_value = "info", env = "DELEGATE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, global = true, env = "DELEGATE_LOG_JSON")]
    log_json: bool,

    /// Project directory for settings and project subagent definitions.
    #[arg(long, global = true, env = "DELEGATE_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Path to the agent binary launched for each attempt.
    #[arg(long, global = true)]
    child_bin: Option<PathBuf>,

    /// Base URL of the remote model resolver.
    #[arg(long, global = true)]
    resolver_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one subagent and print its result.
    Run {
        /// Subagent type (e.g. "explore").
        #[arg(long = "type")]
        subagent_type: String,

        #[arg(long)]
        prompt: String,

        /// Model handle or selector overriding the subagent's own.
        #[arg(long)]
        model: Option<String>,

        /// Attach to an existing agent.
        #[arg(long, conflicts_with = "conversation_id")]
        agent_id: Option<String>,

        /// Attach to an existing conversation.
        #[arg(long)]
        conversation_id: Option<String>,

        #[arg(long)]
        parent_model: Option<String>,

        #[arg(long)]
        parent_agent_id: Option<String>,

        #[arg(long)]
        parent_name: Option<String>,

        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// List the available subagent types.
    List,
}

/// Reports progress through the log.
struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_event(
        &self,
        correlation_id: &str,
        event: &ProgressEvent,
    ) -> Result<(), delegate_engine::orchestration::ObserverError> {
        let event = serde_json::to_string(event).unwrap_or_default();
        info!(correlation_id, %event, "Subagent progress");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let log_filter = format!("delegate_engine={},delegate_core={}", args.log_level, args.log_level);
    delegate_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let project_dir = match args.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let mut config = load_config(Some(&project_dir))?;
    if let Some(bin) = args.child_bin {
        config.engine.child_bin = bin;
    }
    if let Some(url) = args.resolver_url {
        config.engine.resolver_url = Some(url);
    }

    let registry = Arc::new(SubagentRegistry::new());
    let generation = registry.reload(
        Some(project_agents_dir(&project_dir).as_path()),
        personal_agents_dir().as_deref(),
    );
    info!(
        version = env!("CARGO_PKG_VERSION"),
        generation,
        project_dir = %project_dir.display(),
        "Starting delegate"
    );

    match args.command {
        Command::List => {
            print_agents(&registry);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            subagent_type,
            prompt,
            model,
            agent_id,
            conversation_id,
            parent_model,
            parent_agent_id,
            parent_name,
            correlation_id,
        } => {
            let ctx = EngineContext::with_process_executor(&config, registry);
            let orchestrator = Orchestrator::new(ctx);

            let request = SpawnRequest {
                subagent_type,
                prompt,
                model,
                agent_id,
                conversation_id,
                parent: ParentContext {
                    agent_id: parent_agent_id,
                    name: parent_name,
                    model: parent_model,
                },
                correlation_id,
                working_dir: Some(project_dir),
            };

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, cancelling subagent");
                    ctrl_c_cancel.cancel();
                }
            });

            let observer: Arc<dyn ProgressObserver> = Arc::new(LogObserver);
            let result = orchestrator
                .spawn_subagent(request, Some(observer), &cancel)
                .await;
            print_json(&serde_json::to_string_pretty(&result)?);

            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[allow(clippy::print_stdout)]
fn print_json(json: &str) {
    println!("{json}");
}

#[allow(clippy::print_stdout)]
fn print_agents(registry: &SubagentRegistry) {
    let snapshot = registry.snapshot();
    for agent in snapshot.agents() {
        println!("{:<20} {:<16} {}", agent.name, agent.tier_label(), agent.description);
    }
}
