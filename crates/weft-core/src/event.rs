//! In-process fan-out of [`ExecutionEvent`]s.
//!
//! The engine publishes node transitions, agent dispatch and settlement, and
//! the pause or terminal status of every run. Nothing is persisted; a slow
//! subscriber loses the oldest events once the channel is full.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::ExecutionEvent;

pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    /// Every event from every execution.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    /// Events of a single execution, across pauses and resumes.
    pub fn subscribe_execution(&self, execution_id: impl Into<String>) -> ExecutionSubscription {
        ExecutionSubscription {
            rx: self.tx.subscribe(),
            execution_id: execution_id.into(),
            lagged: 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct ExecutionSubscription {
    rx: broadcast::Receiver<ExecutionEvent>,
    execution_id: String,
    lagged: u64,
}

impl ExecutionSubscription {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Next event for this execution. `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.execution_id() == self.execution_id => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => self.lagged += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Events dropped because this subscriber fell behind. Counts all executions.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;

    fn started(id: &str) -> ExecutionEvent {
        ExecutionEvent::Started {
            execution_id: id.into(),
            workflow_id: "wf".into(),
        }
    }

    #[tokio::test]
    async fn execution_subscription_filters_other_runs() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_execution("a");

        bus.publish(started("b"));
        bus.publish(started("a"));
        bus.publish(ExecutionEvent::AgentSettled {
            execution_id: "b".into(),
            message_id: "m-1".into(),
            succeeded: true,
        });
        bus.publish(ExecutionEvent::Finished {
            execution_id: "a".into(),
            status: ExecutionStatus::Completed,
        });

        assert!(matches!(sub.recv().await, Some(ExecutionEvent::Started { .. })));
        assert!(matches!(
            sub.recv().await,
            Some(ExecutionEvent::Finished { status: ExecutionStatus::Completed, .. })
        ));
        assert_eq!(sub.lagged(), 0);

        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_newest_events() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe_execution("a");
        for _ in 0..4 {
            bus.publish(started("a"));
        }
        bus.publish(ExecutionEvent::Paused {
            execution_id: "a".into(),
            node_id: "approval".into(),
        });

        assert!(matches!(sub.recv().await, Some(ExecutionEvent::Started { .. })));
        assert!(matches!(sub.recv().await, Some(ExecutionEvent::Paused { .. })));
        assert_eq!(sub.lagged(), 3);
    }

    #[test]
    fn publish_without_subscribers() {
        EventBus::default().publish(started("a"));
    }
}
