use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use agentflow_agent::Workflow;
use agentflow_core::config::{AgentKind, AppConfig};

#[derive(Parser)]
#[command(name = "agentflow", version, about = "Validate and inspect agent workflows")]
struct Cli {
    /// Path to the workflow config file
    #[arg(short, long, env = "AGENTFLOW_CONFIG", default_value = "workflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the workflow graph and its agent references
    Validate,
    /// Print the execution order and the groups of nodes that can run together
    Plan {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List configured agents
    Agents,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agentflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    debug!(path = %cli.config.display(), agents = config.agents.len(), "Loaded config");

    match cli.command {
        Commands::Validate => {
            let workflow = load_workflow(&config)?;
            let summary = match &workflow {
                Workflow::Sequential(steps) => format!("sequential, {} steps", steps.len()),
                Workflow::Dag(graph) => format!(
                    "dag, {} nodes, entry '{}', final '{}'",
                    graph.len(),
                    graph.entry_point(),
                    graph.final_node()
                ),
            };
            info!(workflow = %config.name, "Workflow is valid");
            println!("{}: OK ({})", config.name, summary);
        }
        Commands::Plan { json } => {
            let workflow = load_workflow(&config)?;
            let levels: Vec<Vec<String>> = match &workflow {
                Workflow::Sequential(steps) => steps.iter().map(|s| vec![s.clone()]).collect(),
                Workflow::Dag(graph) => graph.parallel_levels(),
            };
            if json {
                let order: Vec<&String> = levels.iter().flatten().collect();
                let plan = serde_json::json!({
                    "name": config.name,
                    "order": order,
                    "levels": levels,
                });
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("{}", config.name);
                for (i, level) in levels.iter().enumerate() {
                    println!("  {}. {}", i + 1, level.join(", "));
                }
            }
        }
        Commands::Agents => {
            if config.agents.is_empty() {
                println!("No agents configured.");
            }
            for agent in config.agents.values() {
                let kind = match agent.kind {
                    AgentKind::React => "react",
                    AgentKind::Conversational => "conversational",
                    AgentKind::Planner => "planner",
                };
                let tools = if agent.tools.is_empty() {
                    "-".to_string()
                } else {
                    agent.tools.join(", ")
                };
                println!(
                    "{:<20} {:<15} {}/{}  tools: {}",
                    agent.id, kind, agent.provider, agent.model, tools
                );
            }
        }
    }

    Ok(())
}

/// Validate the workflow and check that every agent it invokes is configured.
fn load_workflow(config: &AppConfig) -> anyhow::Result<Workflow> {
    let workflow = Workflow::from_spec(&config.workflow)?;
    let missing: Vec<&str> = workflow
        .agent_ids()
        .into_iter()
        .filter(|id| !config.agents.contains_key(*id))
        .collect();
    if !missing.is_empty() {
        bail!("workflow references unconfigured agents: {}", missing.join(", "));
    }
    Ok(workflow)
}
