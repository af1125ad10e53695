use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agentflow_core::error::{AgentError, WorkflowExecutionError};
use agentflow_core::event::EventBus;
use agentflow_core::traits::Agent;
use agentflow_core::types::AgentEvent;

use super::condition;
use super::context::ExecutionContext;
use super::node::{preview, Node};
use super::workflow::WorkflowGraph;
use crate::result::{OrchestrationResult, StepReport};

type NodeFuture = BoxFuture<'static, (String, Result<Value, AgentError>, u64)>;

/// Outcome of checking whether a ready node should run.
enum Activation {
    Run(Value),
    Skip(String),
}

/// Executes a `WorkflowGraph`.
///
/// A node becomes ready once every dependency has either produced an output
/// or been skipped. Ready nodes are dispatched in the order they became ready,
/// up to `max_concurrency` at a time, and polled together on the caller's
/// task. The first node failure drops every in-flight sibling and ends the
/// run.
pub struct DagScheduler {
    agents: HashMap<String, Arc<dyn Agent>>,
    max_concurrency: usize,
    cancel: CancellationToken,
    event_bus: Option<Arc<EventBus>>,
}

impl DagScheduler {
    pub fn new(agents: HashMap<String, Arc<dyn Agent>>) -> Self {
        Self {
            agents,
            max_concurrency: 4,
            cancel: CancellationToken::new(),
            event_bus: None,
        }
    }

    /// Convenience constructor keyed by each agent's own id.
    pub fn from_agents(agents: impl IntoIterator<Item = Arc<dyn Agent>>) -> Self {
        Self::new(
            agents
                .into_iter()
                .map(|a| (a.id().to_string(), a))
                .collect(),
        )
    }

    /// Upper bound on concurrently running nodes. Zero is treated as one.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the graph and return only the final output.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        initial_input: Value,
        max_steps: usize,
    ) -> Result<Value, WorkflowExecutionError> {
        self.run(graph, initial_input, max_steps).await.outcome
    }

    /// Run the graph, keeping per-node diagnostics whatever the outcome.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        initial_input: Value,
        max_steps: usize,
    ) -> OrchestrationResult {
        let start = Instant::now();
        let mut ctx = ExecutionContext::new(max_steps);
        let mut steps = Vec::new();

        info!(
            entry_point = %graph.entry_point(),
            final_node = %graph.final_node(),
            nodes = graph.len(),
            max_steps,
            "Starting DAG execution"
        );
        let outcome = self.drive(graph, initial_input, &mut ctx, &mut steps).await;

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(
                steps = ctx.steps_executed(),
                total_elapsed_ms,
                "DAG execution complete"
            ),
            Err(e) => error!(error = %e, total_elapsed_ms, "DAG execution failed"),
        }

        OrchestrationResult {
            outcome,
            steps,
            steps_executed: ctx.steps_executed(),
            total_elapsed_ms,
        }
    }

    async fn drive(
        &self,
        graph: &WorkflowGraph,
        initial_input: Value,
        ctx: &mut ExecutionContext,
        steps: &mut Vec<StepReport>,
    ) -> Result<Value, WorkflowExecutionError> {
        // Fail before anything runs rather than halfway through.
        for node in graph.nodes().filter(|n| graph.is_runnable(&n.id)) {
            if !self.agents.contains_key(&node.agent) {
                return Err(WorkflowExecutionError::UnknownAgent {
                    node_id: node.id.clone(),
                    agent_id: node.agent.clone(),
                });
            }
        }

        let final_node = graph.final_node();
        let mut initial_input = Some(initial_input);
        let mut ready: VecDeque<String> = VecDeque::from([graph.entry_point().to_string()]);
        let mut queued: HashSet<String> = ready.iter().cloned().collect();
        let mut in_flight: FuturesUnordered<NodeFuture> = FuturesUnordered::new();
        let mut running: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();

        loop {
            while in_flight.len() < self.max_concurrency {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let Some(node) = graph.node(&id) else {
                    continue;
                };

                let input = if id == graph.entry_point() {
                    initial_input.take().unwrap_or(Value::Null)
                } else {
                    match activate(node, ctx) {
                        Activation::Run(input) => input,
                        Activation::Skip(reason) => {
                            debug!(node = %node.label(), reason = %reason, "Node skipped");
                            self.emit(AgentEvent::NodeSkipped {
                                node_id: id.clone(),
                                reason: reason.clone(),
                            });
                            ctx.mark_skipped(&id);
                            steps.push(StepReport::skipped(&id, reason));
                            if id == final_node {
                                cancel_running(graph, &mut running, steps);
                                return Err(WorkflowExecutionError::FinalNodeSkipped(id));
                            }
                            enqueue_dependents(graph, &id, ctx, &mut ready, &mut queued);
                            continue;
                        }
                    }
                };

                let Some(agent) = self.agents.get(&node.agent).cloned() else {
                    cancel_running(graph, &mut running, steps);
                    return Err(WorkflowExecutionError::UnknownAgent {
                        node_id: id,
                        agent_id: node.agent.clone(),
                    });
                };

                info!(
                    node = %node.label(),
                    agent = %node.agent,
                    input = %preview(&input),
                    "Executing graph node"
                );
                self.emit(AgentEvent::NodeStarted {
                    node_id: id.clone(),
                });
                running.insert(id.clone(), Utc::now());
                in_flight.push(invoke(id, agent, input));
            }

            if in_flight.is_empty() {
                warn!(
                    final_node = %final_node,
                    "No runnable nodes left before the final node resolved"
                );
                return Err(WorkflowExecutionError::FinalNodeUnresolved(
                    final_node.to_string(),
                ));
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                next = in_flight.next() => next,
            };
            let Some((id, result, elapsed_ms)) = next else {
                warn!("DAG execution cancelled");
                drop(in_flight);
                cancel_running(graph, &mut running, steps);
                return Err(WorkflowExecutionError::Cancelled);
            };

            let started_at = running.remove(&id).unwrap_or_else(Utc::now);
            let agent_id = graph.node(&id).map(|n| n.agent.as_str()).unwrap_or_default();

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    error!(node_id = %id, error = %e, elapsed_ms, "Graph node failed");
                    self.emit(AgentEvent::NodeFailed {
                        node_id: id.clone(),
                        error: e.to_string(),
                    });
                    steps.push(StepReport::failed(&id, agent_id, started_at, elapsed_ms, &e));
                    drop(in_flight);
                    cancel_running(graph, &mut running, steps);
                    return Err(WorkflowExecutionError::NodeFailure {
                        node_id: id,
                        source: e,
                    });
                }
            };

            debug!(
                node_id = %id,
                elapsed_ms,
                output = %preview(&output),
                "Node execution complete"
            );
            self.emit(AgentEvent::NodeCompleted {
                node_id: id.clone(),
                elapsed_ms,
            });
            steps.push(StepReport::completed(&id, agent_id, started_at, elapsed_ms));

            let recorded = ctx.record_output(&id, output).and_then(|_| ctx.record_step());
            if let Err(e) = recorded {
                error!(node_id = %id, error = %e, "Aborting DAG execution");
                drop(in_flight);
                cancel_running(graph, &mut running, steps);
                return Err(e);
            }

            if id == final_node {
                drop(in_flight);
                cancel_running(graph, &mut running, steps);
                return ctx
                    .output(&id)
                    .cloned()
                    .ok_or(WorkflowExecutionError::FinalNodeUnresolved(id));
            }

            enqueue_dependents(graph, &id, ctx, &mut ready, &mut queued);
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

fn invoke(id: String, agent: Arc<dyn Agent>, input: Value) -> NodeFuture {
    Box::pin(async move {
        let start = Instant::now();
        let result = agent.run(input).await;
        (id, result, start.elapsed().as_millis() as u64)
    })
}

/// Queue every consumer of `id` whose dependencies are now all resolved.
fn enqueue_dependents(
    graph: &WorkflowGraph,
    id: &str,
    ctx: &ExecutionContext,
    ready: &mut VecDeque<String>,
    queued: &mut HashSet<String>,
) {
    for consumer in graph.dependents(id) {
        if queued.contains(consumer) {
            continue;
        }
        let Some(node) = graph.node(consumer) else {
            continue;
        };
        if node.dependencies.iter().all(|d| ctx.is_resolved(d)) {
            queued.insert(consumer.clone());
            ready.push_back(consumer.clone());
        }
    }
}

/// Report every node still in flight as cancelled. The futures themselves are
/// dropped by the caller.
fn cancel_running(
    graph: &WorkflowGraph,
    running: &mut BTreeMap<String, DateTime<Utc>>,
    steps: &mut Vec<StepReport>,
) {
    for (id, started_at) in std::mem::take(running) {
        let agent_id = graph.node(&id).map(|n| n.agent.as_str()).unwrap_or_default();
        debug!(node_id = %id, "Cancelling in-flight node");
        steps.push(StepReport::cancelled(&id, agent_id, started_at));
    }
}

/// Decide whether a node with resolved dependencies runs, and with what input.
///
/// - without a mapping, the node is skipped only when every dependency was;
/// - with a mapping, any skipped mapped source skips the node;
/// - a condition whose source was skipped, or that evaluates false, skips it.
fn activate(node: &Node, ctx: &ExecutionContext) -> Activation {
    if node.input_mapping.is_empty() {
        if node.dependencies.iter().all(|d| ctx.is_skipped(d)) {
            return Activation::Skip("all dependencies were skipped".into());
        }
    } else if let Some(source) = node
        .input_mapping
        .values()
        .find(|s| ctx.is_skipped(&s.node))
    {
        return Activation::Skip(format!("mapped source '{}' was skipped", source.node));
    }

    if let Some(condition) = &node.condition {
        let source = node.condition_source().unwrap_or_default();
        match ctx.output(source) {
            None => {
                return Activation::Skip(format!("condition source '{}' was skipped", source));
            }
            Some(output) if !condition::evaluate(&condition.predicate, output) => {
                return Activation::Skip(format!("condition on '{}' evaluated false", source));
            }
            Some(_) => {}
        }
    }

    Activation::Run(assemble_input(node, ctx))
}

fn assemble_input(node: &Node, ctx: &ExecutionContext) -> Value {
    if !node.input_mapping.is_empty() {
        let mut params = Map::new();
        for (param, source) in &node.input_mapping {
            if let Some(output) = ctx.output(&source.node) {
                params.insert(param.clone(), source.extract(output));
            }
        }
        return Value::Object(params);
    }

    if let [only] = node.dependencies.as_slice() {
        return ctx.output(only).cloned().unwrap_or(Value::Null);
    }

    let mut merged = Map::new();
    for dep in &node.dependencies {
        if let Some(output) = ctx.output(dep) {
            merged.insert(dep.clone(), output.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::config::{NodeCondition, Predicate};
    use agentflow_test_utils::RecordingAgent;
    use serde_json::json;

    use crate::result::StepStatus;

    fn scheduler(agents: Vec<Arc<RecordingAgent>>) -> DagScheduler {
        DagScheduler::from_agents(agents.into_iter().map(|a| a as Arc<dyn Agent>))
    }

    #[tokio::test]
    async fn linear_chain_passes_output_through() {
        let a = Arc::new(RecordingAgent::returning("a", json!({"topic": "rust"})));
        let b = Arc::new(RecordingAgent::echo("b"));
        let graph =
            WorkflowGraph::build(vec![Node::new("a"), Node::new("b").depends_on(["a"])], "a", "b")
                .unwrap();

        let out = scheduler(vec![a.clone(), b.clone()])
            .execute(&graph, json!("start"), 10)
            .await
            .unwrap();
        assert_eq!(out, json!({"topic": "rust"}));
        assert_eq!(a.inputs(), vec![json!("start")]);
        assert_eq!(b.inputs(), vec![json!({"topic": "rust"})]);
    }

    #[tokio::test]
    async fn mapping_builds_named_parameters() {
        let profile = Arc::new(RecordingAgent::returning(
            "profile",
            json!({"interests": ["AI"], "level": "expert"}),
        ));
        let discover = Arc::new(RecordingAgent::echo("discover"));
        let graph = WorkflowGraph::build(
            vec![
                Node::new("profile"),
                Node::new("discover")
                    .depends_on(["profile"])
                    .map_input("interests", "profile.interests")
                    .map_input("whole", "profile"),
            ],
            "profile",
            "discover",
        )
        .unwrap();

        let out = scheduler(vec![profile, discover])
            .execute(&graph, json!("user-1"), 10)
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({
                "interests": ["AI"],
                "whole": {"interests": ["AI"], "level": "expert"}
            })
        );
    }

    #[tokio::test]
    async fn false_condition_skips_branch_and_merge_keeps_the_rest() {
        let graph = WorkflowGraph::build(
            vec![
                Node::new("a"),
                Node::new("b")
                    .depends_on(["a"])
                    .with_condition(NodeCondition::new(Predicate::Contains {
                        substring: "AI".into(),
                    })),
                Node::new("c").depends_on(["a"]),
                Node::new("d").depends_on(["b", "c"]),
            ],
            "a",
            "d",
        )
        .unwrap();
        let b = Arc::new(RecordingAgent::returning("b", json!("from b")));
        let d = Arc::new(RecordingAgent::echo("d"));
        let result = scheduler(vec![
            Arc::new(RecordingAgent::returning("a", json!("gardening"))),
            b.clone(),
            Arc::new(RecordingAgent::returning("c", json!("from c"))),
            d.clone(),
        ])
        .run(&graph, json!("go"), 10)
        .await;

        assert_eq!(result.output(), Some(&json!({"c": "from c"})));
        assert_eq!(b.calls(), 0);
        assert_eq!(result.step("b").unwrap().status, StepStatus::Skipped);
        assert_eq!(result.steps_executed, 3);
    }

    #[tokio::test]
    async fn skip_is_contagious_through_mappings() {
        let graph = WorkflowGraph::build(
            vec![
                Node::new("a"),
                Node::new("b").depends_on(["a"]).with_condition(NodeCondition::new(
                    Predicate::Equals { value: json!("yes") },
                )),
                Node::new("c").depends_on(["b"]),
                Node::new("d").depends_on(["a", "c"]).map_input("review", "c"),
            ],
            "a",
            "d",
        )
        .unwrap();
        let result = scheduler(vec![
            Arc::new(RecordingAgent::returning("a", json!("no"))),
            Arc::new(RecordingAgent::echo("b")),
            Arc::new(RecordingAgent::echo("c")),
            Arc::new(RecordingAgent::echo("d")),
        ])
        .run(&graph, json!(null), 10)
        .await;

        assert_eq!(
            result.error(),
            Some(&WorkflowExecutionError::FinalNodeSkipped("d".into()))
        );
        assert_eq!(result.count(StepStatus::Skipped), 3);
        assert_eq!(result.executed_nodes(), vec!["a"]);
    }

    #[tokio::test]
    async fn missing_agent_fails_before_running() {
        let a = Arc::new(RecordingAgent::echo("a"));
        let graph = WorkflowGraph::build(
            vec![Node::new("a"), Node::new("b").depends_on(["a"]).with_agent("ghost")],
            "a",
            "b",
        )
        .unwrap();
        let err = scheduler(vec![a.clone()])
            .execute(&graph, json!(1), 10)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowExecutionError::UnknownAgent {
                node_id: "b".into(),
                agent_id: "ghost".into()
            }
        );
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn step_limit_aborts() {
        let graph = WorkflowGraph::build(
            vec![
                Node::new("a"),
                Node::new("b").depends_on(["a"]),
                Node::new("c").depends_on(["b"]),
            ],
            "a",
            "c",
        )
        .unwrap();
        let c = Arc::new(RecordingAgent::echo("c"));
        let result = scheduler(vec![
            Arc::new(RecordingAgent::echo("a")),
            Arc::new(RecordingAgent::echo("b")),
            c.clone(),
        ])
        .run(&graph, json!(1), 1)
        .await;

        assert_eq!(
            result.error(),
            Some(&WorkflowExecutionError::StepLimitExceeded { max_steps: 1 })
        );
        assert_eq!(c.calls(), 0);
        assert_eq!(result.steps_executed, 2);
    }

    #[tokio::test]
    async fn cancellation_token_stops_the_run() {
        let graph = WorkflowGraph::build(vec![Node::new("slow")], "slow", "slow").unwrap();
        let slow = Arc::new(
            RecordingAgent::echo("slow").with_delay(std::time::Duration::from_secs(30)),
        );
        let token = CancellationToken::new();
        let sched = scheduler(vec![slow.clone()]).with_cancel(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });
        let result = sched.run(&graph, json!(1), 10).await;
        canceller.await.unwrap();

        assert_eq!(result.error(), Some(&WorkflowExecutionError::Cancelled));
        assert_eq!(result.step("slow").unwrap().status, StepStatus::Cancelled);
        assert_eq!(slow.finished(), 0);
    }

    #[tokio::test]
    async fn events_are_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let graph = WorkflowGraph::build(vec![Node::new("only")], "only", "only").unwrap();
        scheduler(vec![Arc::new(RecordingAgent::echo("only"))])
            .with_event_bus(bus.clone())
            .execute(&graph, json!("x"), 5)
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::NodeStarted { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AgentEvent::NodeCompleted { .. }
        ));
    }
}
