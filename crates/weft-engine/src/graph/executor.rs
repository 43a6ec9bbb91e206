use std::collections::HashSet;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::execution::{HistoryStatus, WaitingFor, WorkflowExecution};
use weft_core::template::interpolate;
use weft_core::types::{ExecutionEvent, ToolContext};
use weft_core::workflow::{Node, NodeKind, Workflow};

use super::branch::select_branch;
use super::condition;
use crate::dispatch::DispatchRequest;
use crate::engine::WorkflowEngine;
use crate::registry::ExecutionHandle;
use crate::resolver::ResolveContext;

/// Why a traversal stopped before running out of edges.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// A node failed and `continue_on_error` was off.
    Failed { node_id: String, message: String },
    Cancelled,
}

/// What a node produced and where traversal goes next.
enum Step {
    /// Record the output, bind it into the variable bag, follow every edge.
    Continue(Option<Value>),
    /// Record the output in history and `node_outputs` only, follow every edge.
    Record(Value),
    /// Record the output and follow at most one target.
    Branch(Value, Option<String>),
    /// Entry stays open and nothing downstream runs.
    Wait,
}

/// Depth-first walk over one workflow for one execution.
pub struct GraphExecutor<'a> {
    engine: &'a WorkflowEngine,
    workflow: &'a Workflow,
    handle: &'a ExecutionHandle,
}

impl<'a> GraphExecutor<'a> {
    pub fn new(engine: &'a WorkflowEngine, workflow: &'a Workflow, handle: &'a ExecutionHandle) -> Self {
        Self {
            engine,
            workflow,
            handle,
        }
    }

    /// Run `node_id` and everything reachable from it.
    pub fn traverse<'s>(
        &'s self,
        exec: &'s mut WorkflowExecution,
        visited: &'s mut HashSet<String>,
        node_id: String,
    ) -> BoxFuture<'s, std::result::Result<(), Halt>> {
        Box::pin(async move {
            if self.handle.is_cancelled() {
                debug!(execution_id = %exec.id, node_id = %node_id, "Cancelled before node");
                return Err(Halt::Cancelled);
            }
            if visited.contains(&node_id) {
                return Ok(());
            }

            let Some(node) = self.workflow.node(&node_id) else {
                return Err(Halt::Failed {
                    message: format!("node '{}' not found", node_id),
                    node_id,
                });
            };

            if let NodeKind::Join { wait_for } = &node.kind {
                if let Some(missing) = self.join_blocker(exec, node, wait_for) {
                    debug!(node_id = %node.id, waiting_on = %missing, "Join not ready");
                    return Ok(());
                }
            }

            visited.insert(node_id.clone());
            let idx = exec.begin_node(&node.id);
            let started = Instant::now();
            debug!(execution_id = %exec.id, node_id = %node.id, node_type = node.kind.type_name(), "Entering node");
            self.engine.event_bus.publish(ExecutionEvent::NodeStarted {
                execution_id: exec.id.clone(),
                node_id: node.id.clone(),
                node_type: node.kind.type_name(),
            });

            if let NodeKind::Loop { items, max_iterations, item_variable } = &node.kind {
                return self
                    .run_loop(exec, visited, node, idx, items, *max_iterations, item_variable)
                    .await;
            }

            let step = match self.run_node(exec, node, idx).await {
                Ok(step) => step,
                Err(e) => return self.node_failed(exec, visited, node, idx, e).await,
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match step {
                Step::Wait => Ok(()),
                Step::Continue(output) => {
                    self.node_completed(exec, node, idx, output.clone(), elapsed_ms);
                    if let Some(value) = output {
                        exec.bind_output(node, value);
                    }
                    self.follow(exec, visited, &node.id, false).await
                }
                Step::Record(output) => {
                    self.node_completed(exec, node, idx, Some(output.clone()), elapsed_ms);
                    exec.node_outputs.insert(node.id.clone(), output);
                    self.follow(exec, visited, &node.id, false).await
                }
                Step::Branch(output, target) => {
                    self.node_completed(exec, node, idx, Some(output.clone()), elapsed_ms);
                    exec.bind_output(node, output);
                    match target {
                        Some(target) => self.traverse(exec, visited, target).await,
                        None => {
                            debug!(node_id = %node.id, "No branch matched, path ends");
                            Ok(())
                        }
                    }
                }
            }
        })
    }

    /// Traverse the targets of `node_id`'s outgoing edges in declaration order.
    pub async fn follow(
        &self,
        exec: &mut WorkflowExecution,
        visited: &mut HashSet<String>,
        node_id: &str,
        skip_body: bool,
    ) -> std::result::Result<(), Halt> {
        let targets: Vec<String> = self
            .workflow
            .outgoing(node_id)
            .filter(|e| !(skip_body && e.has_label("body")))
            .map(|e| e.target.clone())
            .collect();

        for target in targets {
            if visited.contains(&target) {
                continue;
            }
            self.traverse(exec, visited, target).await?;
        }
        Ok(())
    }

    async fn run_node(&self, exec: &mut WorkflowExecution, node: &Node, idx: usize) -> Result<Step> {
        match &node.kind {
            NodeKind::Start => Ok(Step::Record(Value::Object(exec.inputs.clone()))),

            NodeKind::End => {
                let snapshot = exec.variables.clone();
                exec.outputs = Some(snapshot.clone());
                Ok(Step::Record(Value::Object(snapshot)))
            }

            NodeKind::Tool { tool, params } => {
                if !self.engine.tools.contains(tool) {
                    warn!(node_id = %node.id, tool = %tool, "Tool not registered, skipping");
                    return Ok(Step::Continue(None));
                }
                let params = {
                    let ctx = ResolveContext::from_execution(exec);
                    self.engine.resolver.resolve_all(params, &ctx).await?
                };
                let ctx = ToolContext::from_execution(exec, &node.id);
                let output = self.engine.tools.execute(tool, params, ctx).await?;
                Ok(Step::Continue(Some(output)))
            }

            NodeKind::Agent { agent, prompt, timeout_ms } => {
                let dispatcher = self.engine.dispatcher.as_ref().ok_or_else(|| {
                    WeftError::Inbox("no inbox client configured".into())
                })?;
                let timeout_ms = timeout_ms.unwrap_or(self.engine.config.default_agent_timeout_ms);
                let request = DispatchRequest {
                    agent: agent.clone(),
                    prompt: interpolate(prompt, &exec.variables),
                    timeout: Duration::from_millis(timeout_ms),
                    execution_id: exec.id.clone(),
                    node_id: node.id.clone(),
                };
                let output = dispatcher.dispatch(self.handle.pending(), request).await?;
                Ok(Step::Continue(Some(output)))
            }

            NodeKind::Council { prompt, models } => {
                let council = self.engine.council.as_ref().ok_or_else(|| {
                    WeftError::Council("no council client configured".into())
                })?;
                let prompt = interpolate(prompt, &exec.variables);
                let result = council.query(prompt, models.clone()).await?;
                Ok(Step::Continue(Some(serde_json::to_value(result)?)))
            }

            NodeKind::Decision { condition } => {
                let result = condition::evaluate_in(condition, &exec.variables)?;
                let text = interpolate(condition, &exec.variables);
                let edge = select_branch(self.workflow, &node.id, &text, result);
                debug!(node_id = %node.id, condition = %text, result, branch = ?edge.map(|e| &e.id), "Decision evaluated");
                let output = json!({
                    "condition": text,
                    "result": result,
                    "branch": edge.map(|e| e.id.clone()),
                });
                Ok(Step::Branch(output, edge.map(|e| e.target.clone())))
            }

            NodeKind::Human { prompt } => {
                exec.mark_waiting(idx, WaitingFor::HumanInput);
                exec.current_node_id = Some(node.id.clone());
                let prompt = prompt.as_deref().map(|p| interpolate(p, &exec.variables));
                info!(
                    execution_id = %exec.id,
                    node_id = %node.id,
                    prompt = prompt.as_deref().unwrap_or(""),
                    "Waiting for human input"
                );
                self.engine.event_bus.publish(ExecutionEvent::Paused {
                    execution_id: exec.id.clone(),
                    node_id: node.id.clone(),
                });
                Ok(Step::Wait)
            }

            NodeKind::Parallel => {
                let branches: Vec<&str> = self
                    .workflow
                    .outgoing(&node.id)
                    .map(|e| e.target.as_str())
                    .collect();
                Ok(Step::Continue(Some(json!({ "branches": branches }))))
            }

            NodeKind::Join { wait_for } => {
                let mut joined = Map::new();
                for id in self.awaited(node, wait_for) {
                    if let (Some(n), Some(output)) = (self.workflow.node(&id), exec.node_outputs.get(&id)) {
                        joined.insert(n.variable_name().to_string(), output.clone());
                    }
                }
                Ok(Step::Continue(Some(Value::Object(joined))))
            }

            NodeKind::Loop { .. } => Err(WeftError::NodeExecution {
                node_id: node.id.clone(),
                message: "loop nodes run through run_loop".into(),
            }),
        }
    }

    fn node_completed(
        &self,
        exec: &mut WorkflowExecution,
        node: &Node,
        idx: usize,
        output: Option<Value>,
        elapsed_ms: u64,
    ) {
        exec.complete_node(idx, output);
        debug!(execution_id = %exec.id, node_id = %node.id, elapsed_ms, "Node completed");
        self.engine.event_bus.publish(ExecutionEvent::NodeCompleted {
            execution_id: exec.id.clone(),
            node_id: node.id.clone(),
        });
    }

    async fn node_failed(
        &self,
        exec: &mut WorkflowExecution,
        visited: &mut HashSet<String>,
        node: &Node,
        idx: usize,
        err: WeftError,
    ) -> std::result::Result<(), Halt> {
        if matches!(err, WeftError::DispatchCancelled { .. }) && self.handle.is_cancelled() {
            exec.skip_node(idx);
            return Err(Halt::Cancelled);
        }

        let message = err.to_string();
        exec.fail_node(idx, &message);
        error!(execution_id = %exec.id, node_id = %node.id, error = %message, "Node failed");
        self.engine.event_bus.publish(ExecutionEvent::NodeFailed {
            execution_id: exec.id.clone(),
            node_id: node.id.clone(),
            error: message.clone(),
        });

        if self.workflow.config.continue_on_error {
            // A failed decision or human node never picked a branch
            if matches!(node.kind, NodeKind::Decision { .. } | NodeKind::Human { .. }) {
                warn!(node_id = %node.id, "Failed branch point, path ends");
                return Ok(());
            }
            warn!(node_id = %node.id, "Continuing past failed node");
            return self.follow(exec, visited, &node.id, false).await;
        }
        Err(Halt::Failed {
            node_id: node.id.clone(),
            message,
        })
    }

    // ── Loop / join ─────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        exec: &mut WorkflowExecution,
        visited: &mut HashSet<String>,
        node: &Node,
        idx: usize,
        items: &Value,
        max_iterations: usize,
        item_variable: &str,
    ) -> std::result::Result<(), Halt> {
        let started = Instant::now();
        let resolved = {
            let ctx = ResolveContext::from_execution(exec);
            self.engine.resolver.resolve(items, &ctx).await
        };
        let items = match resolved {
            Ok(Value::Array(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(single) => vec![single],
            Err(e) => return self.node_failed(exec, visited, node, idx, e).await,
        };

        if items.len() > max_iterations {
            warn!(
                node_id = %node.id,
                items = items.len(),
                max_iterations,
                "Loop truncated to iteration budget"
            );
        }

        let body: Vec<String> = self
            .workflow
            .outgoing(&node.id)
            .filter(|e| e.has_label("body"))
            .map(|e| e.target.clone())
            .collect();

        let mut iterations = Vec::new();
        let mut body_nodes = HashSet::new();
        for (index, item) in items.into_iter().take(max_iterations).enumerate() {
            exec.variables.insert(item_variable.to_string(), item);
            exec.variables.insert("index".to_string(), json!(index));

            let first_entry = exec.history.len();
            let mut scope = visited.clone();
            for target in &body {
                if let Err(halt) = self.traverse(exec, &mut scope, target.clone()).await {
                    match &halt {
                        Halt::Failed { node_id, message } => exec.fail_node(
                            idx,
                            format!("iteration {} failed at '{}': {}", index, node_id, message),
                        ),
                        Halt::Cancelled => exec.skip_node(idx),
                    }
                    return Err(halt);
                }
            }

            let mut outputs = Map::new();
            for entry in &exec.history[first_entry..] {
                if entry.status != HistoryStatus::Completed {
                    continue;
                }
                if let (Some(n), Some(output)) = (self.workflow.node(&entry.node_id), &entry.output) {
                    outputs.insert(n.variable_name().to_string(), output.clone());
                }
            }
            iterations.push(Value::Object(outputs));
            body_nodes.extend(scope.difference(visited).cloned());
        }

        debug!(node_id = %node.id, iterations = iterations.len(), "Loop finished");
        visited.extend(body_nodes);

        let output = Value::Array(iterations);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.node_completed(exec, node, idx, Some(output.clone()), elapsed_ms);
        exec.bind_output(node, output);
        self.follow(exec, visited, &node.id, true).await
    }

    /// Nodes a join waits for: its `wait_for` list, or every direct predecessor.
    fn awaited(&self, node: &Node, wait_for: &[String]) -> Vec<String> {
        if !wait_for.is_empty() {
            return wait_for.to_vec();
        }
        let mut sources: Vec<String> = Vec::new();
        for edge in self.workflow.incoming(&node.id) {
            if !sources.contains(&edge.source) {
                sources.push(edge.source.clone());
            }
        }
        sources
    }

    /// First awaited node that has not completed yet.
    fn join_blocker(&self, exec: &WorkflowExecution, node: &Node, wait_for: &[String]) -> Option<String> {
        self.awaited(node, wait_for)
            .into_iter()
            .find(|id| !exec.has_completed(id))
    }
}
