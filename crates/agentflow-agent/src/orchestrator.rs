use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentflow_core::config::{AppConfig, OrchestratorConfig, WorkflowSpec};
use agentflow_core::error::{AgentFlowError, Result, WorkflowExecutionError};
use agentflow_core::event::EventBus;
use agentflow_core::traits::Agent;

use crate::agents::{build_agent, AgentDeps};
use crate::graph::{DagScheduler, WorkflowGraph};
use crate::result::OrchestrationResult;
use crate::sequential::SequentialRunner;

/// A validated workflow over agent ids.
#[derive(Debug, Clone)]
pub enum Workflow {
    Sequential(Vec<String>),
    Dag(WorkflowGraph),
}

impl Workflow {
    /// Validate a configured workflow. Graphs go through full structural
    /// validation; sequences only need to be non-empty.
    pub fn from_spec(spec: &WorkflowSpec) -> Result<Self> {
        match spec {
            WorkflowSpec::Sequential { sequence } => {
                if sequence.is_empty() {
                    return Err(AgentFlowError::Config(
                        "sequential workflow has no steps".into(),
                    ));
                }
                Ok(Self::Sequential(sequence.clone()))
            }
            WorkflowSpec::Dag(dag) => Ok(Self::Dag(WorkflowGraph::from_spec(dag)?)),
        }
    }

    /// Agent ids the workflow invokes, in first-use order.
    pub fn agent_ids(&self) -> Vec<&str> {
        let all: Vec<&str> = match self {
            Self::Sequential(sequence) => sequence.iter().map(String::as_str).collect(),
            Self::Dag(graph) => graph
                .topological_order()
                .iter()
                .filter_map(|id| graph.node(id))
                .map(|node| node.agent.as_str())
                .collect(),
        };
        let mut ids: Vec<&str> = Vec::with_capacity(all.len());
        for id in all {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Owns a set of agents and one workflow over them.
pub struct Orchestrator {
    name: String,
    config: OrchestratorConfig,
    agents: HashMap<String, Arc<dyn Agent>>,
    workflow: Workflow,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(name: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            name: name.into(),
            config: OrchestratorConfig::default(),
            agents: HashMap::new(),
            workflow,
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Build every configured agent and validate the workflow.
    ///
    /// Fails when an agent cannot be built or the workflow names an agent
    /// that is not configured.
    pub fn from_config(config: &AppConfig, deps: &AgentDeps) -> Result<Self> {
        let workflow = Workflow::from_spec(&config.workflow)?;

        let mut orchestrator = Self::new(&config.name, workflow)
            .with_config(config.orchestrator.clone());
        if let Some(bus) = &deps.event_bus {
            orchestrator = orchestrator.with_event_bus(bus.clone());
        }
        for agent_config in config.agents.values() {
            orchestrator.add_agent(build_agent(agent_config, deps)?);
        }

        let missing: Vec<&str> = orchestrator
            .workflow
            .agent_ids()
            .into_iter()
            .filter(|id| !orchestrator.agents.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            return Err(AgentFlowError::Config(format!(
                "workflow references unconfigured agents: {}",
                missing.join(", ")
            )));
        }

        info!(
            orchestrator = %orchestrator.name,
            agents = orchestrator.agents.len(),
            "Orchestrator ready"
        );
        Ok(orchestrator)
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register an agent under its own id, replacing any previous one.
    pub fn add_agent(&mut self, agent: Arc<dyn Agent>) {
        let id = agent.id().to_string();
        if self.agents.insert(id.clone(), agent).is_some() {
            warn!(agent = %id, "Replaced existing agent");
        } else {
            debug!(agent = %id, "Registered agent");
        }
    }

    pub fn remove_agent(&mut self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.remove(id)
    }

    pub fn agent(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.get(id)
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the workflow once.
    ///
    /// Execution failures are reported inside the returned result; `Err` is
    /// reserved for a sequence naming an agent that is not registered.
    pub async fn execute(&self, input: Value) -> Result<OrchestrationResult> {
        info!(orchestrator = %self.name, "Executing workflow");
        match &self.workflow {
            Workflow::Sequential(sequence) => {
                let steps = sequence
                    .iter()
                    .map(|id| {
                        self.agents.get(id).cloned().ok_or_else(|| {
                            WorkflowExecutionError::UnknownAgent {
                                node_id: id.clone(),
                                agent_id: id.clone(),
                            }
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut runner = SequentialRunner::new().with_cancel(self.cancel.clone());
                if let Some(bus) = &self.event_bus {
                    runner = runner.with_event_bus(bus.clone());
                }
                Ok(runner.run(&steps, input).await)
            }
            Workflow::Dag(graph) => {
                let mut scheduler = DagScheduler::new(self.agents.clone())
                    .with_max_concurrency(self.config.max_concurrency)
                    .with_cancel(self.cancel.clone());
                if let Some(bus) = &self.event_bus {
                    scheduler = scheduler.with_event_bus(bus.clone());
                }
                Ok(scheduler.run(graph, input, self.config.max_steps).await)
            }
        }
    }
}
