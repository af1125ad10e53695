//! Workflow graphs: validated DAGs of agent invocations.
//!
//! A workflow is a set of `Node`s, each wrapping one agent invocation and
//! naming the nodes it depends on. `WorkflowGraph::build` validates references,
//! acyclicity, and reachability once; the result is immutable.
//!
//! The `DagScheduler` walks a graph from its entry point, running every node
//! whose dependencies have resolved, routing producer outputs into consumer
//! inputs through `input_mapping`, and deactivating branches whose condition
//! evaluates false.

pub mod condition;
pub mod context;
pub mod node;
pub mod scheduler;
pub mod workflow;

pub use condition::evaluate;
pub use context::ExecutionContext;
pub use node::{InputSource, Node};
pub use scheduler::DagScheduler;
pub use workflow::WorkflowGraph;
