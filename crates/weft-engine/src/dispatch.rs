//! Agent dispatch and settlement.
//!
//! A dispatched task can be settled by four racing paths: a poll that sees a
//! terminal status, an inbound callback routed through the
//! [`ExecutionRegistry`](crate::registry::ExecutionRegistry), the timeout
//! timer, or teardown. All of them go through [`PendingTasks::settle`] (or
//! [`PendingTasks::teardown`]), which removes the entry and flips its guard
//! under the table lock, so exactly one path wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::traits::InboxClient;
use weft_core::types::{AgentOutcome, ExecutionEvent, MessageMetadata, OutboundMessage};

/// An outstanding agent call awaiting settlement.
pub struct PendingAgentTask {
    pub message_id: String,
    tx: oneshot::Sender<Result<Value>>,
    timer: Option<AbortHandle>,
    poller: Option<AbortHandle>,
    settled: AtomicBool,
}

impl PendingAgentTask {
    fn abort_watchers(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

/// Convert a reported outcome into the value handed back to the awaiting node.
pub fn settlement(message_id: &str, outcome: AgentOutcome) -> Result<Value> {
    match outcome {
        AgentOutcome::Completed(value) => Ok(value),
        AgentOutcome::Failed(message) => Err(WeftError::DispatchFailed {
            message_id: message_id.to_string(),
            message,
        }),
    }
}

/// Pending-task table of one execution.
pub struct PendingTasks {
    execution_id: String,
    tasks: Mutex<HashMap<String, PendingAgentTask>>,
    closed: AtomicBool,
    event_bus: Arc<EventBus>,
}

impl PendingTasks {
    pub fn new(execution_id: impl Into<String>, event_bus: Arc<EventBus>) -> Self {
        Self {
            execution_id: execution_id.into(),
            tasks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            event_bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingAgentTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, message_id: &str, tx: oneshot::Sender<Result<Value>>) -> Result<()> {
        let mut tasks = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(WeftError::DispatchCancelled {
                message_id: message_id.to_string(),
            });
        }
        tasks.insert(
            message_id.to_string(),
            PendingAgentTask {
                message_id: message_id.to_string(),
                tx,
                timer: None,
                poller: None,
                settled: AtomicBool::new(false),
            },
        );
        Ok(())
    }

    /// Hand the timer and poller to the entry, or stop them if it is already gone.
    fn attach(&self, message_id: &str, timer: AbortHandle, poller: AbortHandle) {
        let mut tasks = self.lock();
        match tasks.get_mut(message_id) {
            Some(task) => {
                task.timer = Some(timer);
                task.poller = Some(poller);
            }
            None => {
                timer.abort();
                poller.abort();
            }
        }
    }

    /// Settle a pending task. Returns false when the task is unknown or already settled.
    pub fn settle(&self, message_id: &str, outcome: Result<Value>) -> bool {
        let task = {
            let mut tasks = self.lock();
            match tasks.get(message_id) {
                Some(task) if !task.settled.swap(true, Ordering::AcqRel) => tasks.remove(message_id),
                _ => None,
            }
        };

        let Some(mut task) = task else {
            debug!(message_id, "Settlement ignored, no pending task");
            return false;
        };

        task.abort_watchers();
        let succeeded = outcome.is_ok();
        // Receiver may be gone if the awaiting node was dropped
        let _ = task.tx.send(outcome);

        info!(
            execution_id = %self.execution_id,
            message_id,
            succeeded,
            "Agent task settled"
        );
        self.event_bus.publish(ExecutionEvent::AgentSettled {
            execution_id: self.execution_id.clone(),
            message_id: message_id.to_string(),
            succeeded,
        });
        true
    }

    /// Drop every pending task without settling it. Later settlements are no-ops.
    pub fn teardown(&self) -> usize {
        let drained: Vec<PendingAgentTask> = {
            let mut tasks = self.lock();
            self.closed.store(true, Ordering::Release);
            tasks.drain().map(|(_, task)| task).collect()
        };

        let count = drained.len();
        for mut task in drained {
            task.settled.store(true, Ordering::Release);
            task.abort_watchers();
            debug!(message_id = %task.message_id, "Pending agent task torn down");
        }
        if count > 0 {
            warn!(execution_id = %self.execution_id, count, "Tore down pending agent tasks");
        }
        count
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single agent call as issued by an `agent` node.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub agent: String,
    pub prompt: String,
    pub timeout: Duration,
    pub execution_id: String,
    pub node_id: String,
}

/// Sends agent tasks to the inbox and waits for them to settle.
pub struct AgentDispatcher {
    inbox: Arc<dyn InboxClient>,
    sender: String,
    poll_interval: Duration,
    callback_url: Option<String>,
    event_bus: Arc<EventBus>,
}

impl AgentDispatcher {
    pub fn new(inbox: Arc<dyn InboxClient>, event_bus: Arc<EventBus>) -> Self {
        Self {
            inbox,
            sender: "weft".to_string(),
            poll_interval: Duration::from_secs(2),
            callback_url: None,
            event_bus,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    /// Send the task and wait until poll, callback or timeout settles it.
    pub async fn dispatch(&self, pending: &Arc<PendingTasks>, req: DispatchRequest) -> Result<Value> {
        let message = OutboundMessage {
            to: req.agent.clone(),
            from: self.sender.clone(),
            task: req.prompt,
            metadata: MessageMetadata {
                execution_id: req.execution_id.clone(),
                node_id: req.node_id.clone(),
                callback_url: self.callback_url.clone(),
            },
        };

        let receipt = self.inbox.send(message).await?;
        let message_id = receipt
            .message_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (tx, rx) = oneshot::channel();
        pending.insert(&message_id, tx)?;

        let timeout_ms = req.timeout.as_millis() as u64;
        let timer = tokio::spawn({
            let pending = Arc::clone(pending);
            let message_id = message_id.clone();
            let timeout = req.timeout;
            async move {
                tokio::time::sleep(timeout).await;
                let outcome = Err(WeftError::DispatchTimeout {
                    message_id: message_id.clone(),
                    timeout_ms,
                });
                if pending.settle(&message_id, outcome) {
                    warn!(message_id = %message_id, timeout_ms, "Agent task timed out");
                }
            }
        });

        let poller = tokio::spawn(poll_until_settled(
            Arc::clone(&self.inbox),
            Arc::clone(pending),
            message_id.clone(),
            self.poll_interval,
        ));

        pending.attach(&message_id, timer.abort_handle(), poller.abort_handle());

        info!(
            execution_id = %req.execution_id,
            node_id = %req.node_id,
            agent = %req.agent,
            message_id = %message_id,
            timeout_ms,
            "Agent task dispatched"
        );
        self.event_bus.publish(ExecutionEvent::AgentDispatched {
            execution_id: req.execution_id,
            node_id: req.node_id,
            message_id: message_id.clone(),
        });

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(WeftError::DispatchCancelled { message_id }),
        }
    }
}

/// Poll the inbox until the task reports a terminal status or leaves the table.
async fn poll_until_settled(
    inbox: Arc<dyn InboxClient>,
    pending: Arc<PendingTasks>,
    message_id: String,
    interval: Duration,
) {
    loop {
        tokio::time::sleep(interval).await;
        if !pending.contains(&message_id) {
            break;
        }

        match inbox.status(&message_id).await {
            Ok(status) => {
                if let Some(outcome) = status.outcome() {
                    pending.settle(&message_id, settlement(&message_id, outcome));
                    break;
                }
                debug!(message_id = %message_id, status = ?status.status, "Agent task still open");
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Inbox status poll failed");
            }
        }
    }
}
