use thiserror::Error;

/// Raised by `WorkflowGraph::build`, never during execution.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphValidationError {
    #[error("Workflow graph has no nodes")]
    EmptyGraph,

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("'{referrer}' references unknown node '{target}'")]
    UnknownNodeReference { referrer: String, target: String },

    #[error("Node '{node}' reads from '{source_node}' without depending on it")]
    UndeclaredDependency { node: String, source_node: String },

    #[error("Cyclic dependency among nodes: {}", .nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    #[error("Entry point '{entry_point}' must not have dependencies (has: {})", .dependencies.join(", "))]
    InvalidEntryPoint {
        entry_point: String,
        dependencies: Vec<String>,
    },

    #[error("Invalid condition on node '{node}': {message}")]
    InvalidCondition { node: String, message: String },

    #[error("Final node '{final_node}' is not reachable from entry point '{entry_point}'")]
    UnreachableFinalNode {
        entry_point: String,
        final_node: String,
    },

    #[error("Final node '{final_node}' waits on root nodes other than the entry point: {}", .roots.join(", "))]
    FinalNodeBlockedByRoot {
        final_node: String,
        roots: Vec<String>,
    },
}

/// Failure of a single tool call inside a reasoning loop.
///
/// Everything except `ToolRaised { fatal: true, .. }` is recoverable: the error
/// is written back into the transcript and the model gets another round.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolInvocationError {
    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Invalid parameters for {tool}: {message}")]
    InvalidParameters { tool: String, message: String },

    #[error("Tool {tool} failed: {message}")]
    ToolRaised {
        tool: String,
        message: String,
        fatal: bool,
    },
}

impl ToolInvocationError {
    /// A recoverable failure raised by the tool itself.
    pub fn raised(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolRaised {
            tool: tool.into(),
            message: message.into(),
            fatal: false,
        }
    }

    /// A failure that aborts the reasoning loop.
    pub fn fatal(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolRaised {
            tool: tool.into(),
            message: message.into(),
            fatal: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ToolRaised { fatal: true, .. })
    }

    /// Short machine-readable discriminator used in tool-role error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidParameters { .. } => "invalid_parameters",
            Self::ToolRaised { .. } => "tool_raised",
        }
    }
}

/// Opaque failure reported by the completion collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// Failure reported by a memory backend. Memory is best-effort context, so the
/// reasoning loop logs these instead of failing.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Memory error: {0}")]
pub struct MemoryError(pub String);

/// Terminal failure of one reasoning loop run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("Agent exceeded max iterations ({max_iterations})")]
    IterationLimitExceeded { max_iterations: usize },

    #[error("Fatal tool error at iteration {iteration}: {source}")]
    FatalToolError {
        iteration: usize,
        source: ToolInvocationError,
    },

    #[error("Provider error at iteration {iteration}: {message}")]
    ProviderError { iteration: usize, message: String },

    #[error("Invalid provider response at iteration {iteration}: {message}")]
    InvalidResponse { iteration: usize, message: String },

    #[error("Agent cancelled at iteration {iteration}")]
    Cancelled { iteration: usize },
}

/// Raised by the DAG scheduler and the sequential runner. Fail-fast: the first
/// one ends the run and no partial outputs are returned.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkflowExecutionError {
    #[error("Node '{node_id}' failed: {source}")]
    NodeFailure { node_id: String, source: AgentError },

    #[error("Workflow exceeded max steps ({max_steps})")]
    StepLimitExceeded { max_steps: usize },

    #[error("Node '{node_id}' uses agent '{agent_id}' which is not registered")]
    UnknownAgent { node_id: String, agent_id: String },

    #[error("Output for node '{0}' was already written")]
    OutputAlreadyWritten(String),

    #[error("Final node '{0}' was skipped")]
    FinalNodeSkipped(String),

    #[error("Final node '{0}' was never resolved")]
    FinalNodeUnresolved(String),

    #[error("Sequential workflow has no steps")]
    EmptySequence,

    #[error("Workflow cancelled")]
    Cancelled,
}

impl WorkflowExecutionError {
    /// The node the failure is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailure { node_id, .. } | Self::UnknownAgent { node_id, .. } => {
                Some(node_id)
            }
            Self::OutputAlreadyWritten(id)
            | Self::FinalNodeSkipped(id)
            | Self::FinalNodeUnresolved(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentFlowError {
    #[error(transparent)]
    Validation(#[from] GraphValidationError),

    #[error(transparent)]
    Execution(#[from] WorkflowExecutionError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Tool(#[from] ToolInvocationError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentFlowError>;
