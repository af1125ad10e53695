pub mod agent_loop;
pub mod agents;
pub mod graph;
pub mod orchestrator;
pub mod result;
pub mod sequential;

pub use agent_loop::{AgentRun, Phase, ReasoningLoop};
pub use agents::{build_agent, parse_plan, AgentDeps, ReasoningAgent};
pub use graph::{evaluate, DagScheduler, ExecutionContext, InputSource, Node, WorkflowGraph};
pub use orchestrator::{Orchestrator, Workflow};
pub use result::{OrchestrationResult, StepReport, StepStatus};
pub use sequential::SequentialRunner;
