use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, warn};

use weft_core::config::{AppConfig, EngineConfig};
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::execution::{ExecutionError, ExecutionStatus, WorkflowExecution};
use weft_core::traits::{CouncilClient, InboxClient};
use weft_core::types::{AgentOutcome, ExecutionEvent};
use weft_core::workflow::Workflow;
use weft_tools::ToolRegistry;

use crate::council::HttpCouncilClient;
use crate::dispatch::AgentDispatcher;
use crate::graph::{GraphExecutor, Halt};
use crate::inbox::HttpInboxClient;
use crate::registry::{ExecutionHandle, ExecutionRegistry};
use crate::resolver::ParameterResolver;

/// Runs workflows and owns the registry of in-flight executions.
///
/// The engine never persists anything. Callers hold the returned
/// [`WorkflowExecution`] and hand it back for [`resume`](Self::resume) or
/// [`cancel`](Self::cancel).
pub struct WorkflowEngine {
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) resolver: Arc<ParameterResolver>,
    pub(crate) dispatcher: Option<AgentDispatcher>,
    pub(crate) council: Option<Arc<dyn CouncilClient>>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) config: EngineConfig,
    registry: Arc<ExecutionRegistry>,
}

/// Builder for [`WorkflowEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    tools: Option<Arc<ToolRegistry>>,
    resolver: Option<Arc<ParameterResolver>>,
    inbox: Option<Arc<dyn InboxClient>>,
    callback_url: Option<String>,
    council: Option<Arc<dyn CouncilClient>>,
    event_bus: Option<Arc<EventBus>>,
    registry: Option<Arc<ExecutionRegistry>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            tools: None,
            resolver: None,
            inbox: None,
            callback_url: None,
            council: None,
            event_bus: None,
            registry: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tools(mut self, tools: impl Into<Arc<ToolRegistry>>) -> Self {
        self.tools = Some(tools.into());
        self
    }

    pub fn with_resolver(mut self, resolver: impl Into<Arc<ParameterResolver>>) -> Self {
        self.resolver = Some(resolver.into());
        self
    }

    pub fn with_inbox(mut self, inbox: Arc<dyn InboxClient>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// URL sent with each agent task so the inbox can call back.
    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    pub fn with_council(mut self, council: Arc<dyn CouncilClient>) -> Self {
        self.council = Some(council);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ExecutionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let event_bus = self.event_bus.unwrap_or_default();
        let dispatcher = self.inbox.map(|inbox| {
            AgentDispatcher::new(inbox, Arc::clone(&event_bus))
                .with_sender(self.config.sender.clone())
                .with_poll_interval(Duration::from_millis(self.config.poll_interval_ms))
                .with_callback_url(self.callback_url)
        });

        WorkflowEngine {
            tools: self.tools.unwrap_or_else(|| Arc::new(ToolRegistry::with_builtins())),
            resolver: self.resolver.unwrap_or_default(),
            dispatcher,
            council: self.council,
            event_bus,
            config: self.config,
            registry: self.registry.unwrap_or_default(),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Build an engine wired to the HTTP inbox and council from `config`.
    pub fn from_config(config: &AppConfig, tools: ToolRegistry) -> Result<Self> {
        let mut builder = Self::builder()
            .with_config(config.engine.clone())
            .with_tools(tools)
            .with_inbox(Arc::new(HttpInboxClient::new(&config.inbox)?))
            .with_callback_url(config.callback_url());
        if let Some(council) = &config.council {
            builder = builder.with_council(Arc::new(HttpCouncilClient::new(council)?));
        }
        Ok(builder.build())
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Structural checks; nothing runs.
    pub fn validate(&self, workflow: &Workflow) -> Result<()> {
        workflow.validate()
    }

    /// Validate and create a `pending` execution record.
    pub fn prepare(&self, workflow: &Workflow, inputs: Map<String, Value>) -> Result<WorkflowExecution> {
        workflow.validate()?;
        Ok(WorkflowExecution::new(workflow.id.clone(), inputs))
    }

    /// Create an execution and run it to completion, failure or a pause.
    pub async fn execute(&self, workflow: &Workflow, inputs: Map<String, Value>) -> Result<WorkflowExecution> {
        let execution = self.prepare(workflow, inputs)?;
        self.run(workflow, execution).await
    }

    /// Register an execution ahead of its run.
    ///
    /// From here on [`request_cancel`](Self::request_cancel) reaches it, even
    /// if the run itself starts later on another task.
    pub fn claim(&self, execution: &WorkflowExecution) -> Result<ExecutionClaim> {
        Ok(ExecutionClaim {
            handle: self.register(execution)?,
        })
    }

    /// Run a `pending` execution from the start node.
    ///
    /// Node failures do not surface as `Err`; they end the run `failed` with
    /// [`WorkflowExecution::error`] set. `Err` means the run could not start.
    pub async fn run(&self, workflow: &Workflow, execution: WorkflowExecution) -> Result<WorkflowExecution> {
        let claim = self.claim(&execution)?;
        self.run_claimed(workflow, execution, claim).await
    }

    /// [`run`](Self::run) for an execution already claimed with [`claim`](Self::claim).
    pub async fn run_claimed(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
        claim: ExecutionClaim,
    ) -> Result<WorkflowExecution> {
        let handle = self.take_claim(claim, &execution)?;
        if let Err(e) = check_start(workflow, &execution, ExecutionStatus::Pending) {
            self.registry.remove(&execution.id);
            return Err(e);
        }

        execution.transition(ExecutionStatus::Running)?;
        info!(execution_id = %execution.id, workflow_id = %workflow.id, "Execution started");
        self.event_bus.publish(ExecutionEvent::Started {
            execution_id: execution.id.clone(),
            workflow_id: workflow.id.clone(),
        });

        let mut visited = HashSet::new();
        let outcome = GraphExecutor::new(self, workflow, &handle)
            .traverse(&mut execution, &mut visited, workflow.start_node_id.clone())
            .await;

        self.finish(&mut execution, outcome)?;
        Ok(execution)
    }

    /// Continue a paused execution past its waiting human node.
    pub async fn resume(
        &self,
        workflow: &Workflow,
        execution: WorkflowExecution,
        input: Value,
    ) -> Result<WorkflowExecution> {
        let claim = self.claim(&execution)?;
        self.resume_claimed(workflow, execution, input, claim).await
    }

    /// [`resume`](Self::resume) for an execution already claimed with [`claim`](Self::claim).
    pub async fn resume_claimed(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
        input: Value,
        claim: ExecutionClaim,
    ) -> Result<WorkflowExecution> {
        let handle = self.take_claim(claim, &execution)?;
        let waiting = check_start(workflow, &execution, ExecutionStatus::Paused).and_then(|()| {
            let idx = execution.waiting_entry().ok_or_else(|| {
                WeftError::Traversal(format!("execution {} has no node waiting for input", execution.id))
            })?;
            let node_id = execution.history[idx].node_id.clone();
            let node = workflow.node(&node_id).ok_or_else(|| {
                WeftError::Traversal(format!("waiting node '{}' not in workflow", node_id))
            })?;
            Ok((idx, node))
        });
        let (idx, node) = match waiting {
            Ok(found) => found,
            Err(e) => {
                self.registry.remove(&execution.id);
                return Err(e);
            }
        };

        execution.transition(ExecutionStatus::Running)?;
        execution.complete_node(idx, Some(input.clone()));
        execution.bind_output(node, input);
        info!(execution_id = %execution.id, node_id = %node.id, "Execution resumed");
        self.event_bus.publish(ExecutionEvent::Started {
            execution_id: execution.id.clone(),
            workflow_id: workflow.id.clone(),
        });

        let mut visited = execution.entered_nodes();
        let outcome = GraphExecutor::new(self, workflow, &handle)
            .follow(&mut execution, &mut visited, &node.id, false)
            .await;

        self.finish(&mut execution, outcome)?;
        Ok(execution)
    }

    /// Cancel a caller-held execution that is not currently running.
    pub fn cancel(&self, execution: &mut WorkflowExecution) -> Result<()> {
        execution.transition(ExecutionStatus::Cancelled)?;
        skip_waiting(execution);
        if self.registry.remove(&execution.id).is_some() {
            warn!(execution_id = %execution.id, "Cancelled execution was still registered");
        }
        info!(execution_id = %execution.id, "Execution cancelled");
        self.event_bus.publish(ExecutionEvent::Finished {
            execution_id: execution.id.clone(),
            status: ExecutionStatus::Cancelled,
        });
        Ok(())
    }

    /// Ask an in-flight run to stop before its next node. False if it is not running.
    pub fn request_cancel(&self, execution_id: &str) -> bool {
        self.registry.cancel(execution_id)
    }

    /// Inbound callback path: settle the pending task for `message_id`.
    pub fn deliver_callback(&self, message_id: &str, outcome: AgentOutcome) -> bool {
        self.registry.deliver(message_id, outcome)
    }

    fn register(&self, execution: &WorkflowExecution) -> Result<Arc<ExecutionHandle>> {
        let handle = Arc::new(ExecutionHandle::new(
            execution.id.clone(),
            execution.workflow_id.clone(),
            Arc::clone(&self.event_bus),
        ));
        self.registry.register(Arc::clone(&handle))?;
        Ok(handle)
    }

    fn take_claim(&self, claim: ExecutionClaim, execution: &WorkflowExecution) -> Result<Arc<ExecutionHandle>> {
        if claim.handle.execution_id != execution.id {
            self.registry.remove(&claim.handle.execution_id);
            return Err(WeftError::Traversal(format!(
                "claim for execution {} used for {}",
                claim.handle.execution_id, execution.id
            )));
        }
        Ok(claim.handle)
    }

    fn finish(&self, execution: &mut WorkflowExecution, outcome: std::result::Result<(), Halt>) -> Result<()> {
        let status = match outcome {
            Ok(()) if execution.waiting_entry().is_some() => ExecutionStatus::Paused,
            Ok(()) => ExecutionStatus::Completed,
            Err(Halt::Failed { node_id, message }) => {
                execution.error = Some(ExecutionError { node_id, message });
                ExecutionStatus::Failed
            }
            Err(Halt::Cancelled) => {
                skip_waiting(execution);
                ExecutionStatus::Cancelled
            }
        };

        self.registry.remove(&execution.id);
        execution.transition(status)?;

        match status {
            ExecutionStatus::Failed => {
                let error = execution.error.as_ref();
                warn!(
                    execution_id = %execution.id,
                    node_id = error.map(|e| e.node_id.as_str()).unwrap_or(""),
                    error = error.map(|e| e.message.as_str()).unwrap_or(""),
                    "Execution failed"
                );
            }
            _ => info!(
                execution_id = %execution.id,
                status = %status,
                nodes = execution.history.len(),
                "Execution finished"
            ),
        }
        self.event_bus.publish(ExecutionEvent::Finished {
            execution_id: execution.id.clone(),
            status,
        });
        Ok(())
    }
}

/// Registry slot held between [`WorkflowEngine::claim`] and the run that uses it.
pub struct ExecutionClaim {
    handle: Arc<ExecutionHandle>,
}

impl ExecutionClaim {
    pub fn execution_id(&self) -> &str {
        &self.handle.execution_id
    }
}

/// Checks shared by a fresh run and a resume, before any state changes.
fn check_start(workflow: &Workflow, execution: &WorkflowExecution, expected: ExecutionStatus) -> Result<()> {
    workflow.validate()?;
    if execution.workflow_id != workflow.id {
        return Err(WeftError::Traversal(format!(
            "execution {} belongs to workflow '{}', not '{}'",
            execution.id, execution.workflow_id, workflow.id
        )));
    }
    if execution.status != expected {
        return Err(WeftError::InvalidTransition {
            from: execution.status.to_string(),
            to: ExecutionStatus::Running.to_string(),
        });
    }
    Ok(())
}

fn skip_waiting(execution: &mut WorkflowExecution) {
    while let Some(idx) = execution.waiting_entry() {
        execution.skip_node(idx);
    }
}
