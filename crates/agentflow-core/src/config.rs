use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AgentFlowError, Result};
use crate::types::CompletionOptions;

/// Top-level AgentFlow configuration: agents plus one workflow over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
    pub workflow: WorkflowSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on node invocations per DAG run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Upper bound on concurrently running independent nodes.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_max_steps() -> usize {
    50
}

fn default_max_concurrency() -> usize {
    4
}

/// Which agent implementation a config entry builds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Reasoning loop with tool use.
    #[default]
    #[serde(alias = "function_calling")]
    React,
    /// Single completion, no tools.
    Conversational,
    /// Single tool-free completion parsed into a JSON plan.
    Planner,
}

/// Memory attached to an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryConfig {
    #[default]
    None,
    Message {
        /// Oldest messages are evicted beyond this many.
        #[serde(default)]
        max_messages: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Defaults to the key of the `[agents.<key>]` table.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: AgentKind,
    /// Tool names this agent may call. Order does not matter.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: String,
    pub model: String,
    pub provider: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_max_iterations() -> usize {
    10
}

fn default_temperature() -> f32 {
    0.7
}

impl AgentConfig {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            kind: AgentKind::default(),
            tools: vec![],
            system_prompt: String::new(),
            model: model.into(),
            provider: provider.into(),
            max_iterations: default_max_iterations(),
            temperature: default_temperature(),
            max_tokens: None,
            memory: MemoryConfig::default(),
        }
    }

    pub fn with_kind(mut self, kind: AgentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// The workflow an orchestrator runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSpec {
    /// Linear chain of agent ids.
    Sequential { sequence: Vec<String> },
    /// Dependency graph.
    Dag(DagSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DagSpec {
    pub entry_point: String,
    pub final_node: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,
}

/// Per-node record of a DAG workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    /// Agent invoked by this node. Defaults to the node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Parameter name -> `"<node>"` or `"<node>.<field>"`.
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<NodeCondition>,
}

/// Activation condition of a node, evaluated against one producer's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeCondition {
    /// Producer whose output is tested. Defaults to the node's first dependency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub predicate: Predicate,
}

impl NodeCondition {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            source: None,
            predicate,
        }
    }

    pub fn on(source: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            source: Some(source.into()),
            predicate,
        }
    }
}

/// Serializable predicate over a JSON value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { value: serde_json::Value },
    NotEquals { value: serde_json::Value },
    /// Substring of the textual rendering of the value.
    Contains { substring: String },
    /// Regex over the textual rendering of the value.
    Matches { pattern: String },
    /// Dot path into an object output.
    FieldEquals {
        path: String,
        value: serde_json::Value,
    },
    /// Not null, false, 0, or empty.
    Truthy,
    /// `key == "value"`, `key != "value"`, `key contains "value"`.
    Expr { expr: String },
    Not { predicate: Box<Predicate> },
    All { predicates: Vec<Predicate> },
    Any { predicates: Vec<Predicate> },
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AgentFlowError::ConfigNotFound(path.display().to_string()))?;
        debug!(path = %path.display(), bytes = content.len(), "Loading config");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let mut config: AppConfig =
            toml::from_str(&expanded).map_err(|e| AgentFlowError::Config(e.to_string()))?;
        config.normalize()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AgentFlowError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Fill agent ids from their table keys and reject mismatches.
    fn normalize(&mut self) -> Result<()> {
        for (key, agent) in self.agents.iter_mut() {
            if agent.id.is_empty() {
                agent.id = key.clone();
            } else if agent.id != *key {
                return Err(AgentFlowError::Config(format!(
                    "agent table '{}' declares mismatching id '{}'",
                    key, agent.id
                )));
            }
            if agent.name.is_empty() {
                agent.name = key.clone();
            }
        }
        debug!(
            name = %self.name,
            agents = self.agents.len(),
            "Config normalized"
        );
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns. Unset variables are left verbatim.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(val) => result.push_str(&val),
                    Err(_) => {
                        warn!(var = name, "Unset environment variable left unexpanded");
                        result.push_str(&rest[start..start + 3 + end]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}
