use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::traits::InboxClient;
use weft_core::types::{InboxStatus, MessageStatus, OutboundMessage, SendReceipt};

pub fn pending_status() -> MessageStatus {
    MessageStatus {
        status: InboxStatus::Pending,
        response: None,
        error: None,
    }
}

pub fn completed_status(response: Value) -> MessageStatus {
    MessageStatus {
        status: InboxStatus::Completed,
        response: Some(response),
        error: None,
    }
}

pub fn failed_status(error: &str) -> MessageStatus {
    MessageStatus {
        status: InboxStatus::Failed,
        response: None,
        error: Some(error.to_string()),
    }
}

/// Scriptable in-memory inbox.
///
/// Messages get ids `msg-1`, `msg-2`, ... unless built with
/// [`MockInbox::without_ids`]. Every poll reports `pending` until a status is
/// set for the message or the [`reply_after`](MockInbox::reply_after) script
/// kicks in.
pub struct MockInbox {
    sent: Mutex<Vec<OutboundMessage>>,
    polls: Mutex<HashMap<String, usize>>,
    statuses: Mutex<HashMap<String, MessageStatus>>,
    reply_after: Option<(usize, MessageStatus)>,
    failing_polls: AtomicUsize,
    next_id: AtomicUsize,
    assign_ids: bool,
    send_error: Option<String>,
}

impl MockInbox {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            reply_after: None,
            failing_polls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            assign_ids: true,
            send_error: None,
        }
    }

    /// Send receipts carry no message id.
    pub fn without_ids() -> Self {
        Self {
            assign_ids: false,
            ..Self::new()
        }
    }

    /// Every send fails with an inbox error.
    pub fn failing(message: &str) -> Self {
        Self {
            send_error: Some(message.to_string()),
            ..Self::new()
        }
    }

    /// Report `status` for every message from its `polls`-th poll on.
    pub fn reply_after(mut self, polls: usize, status: MessageStatus) -> Self {
        self.reply_after = Some((polls, status));
        self
    }

    /// The next `n` polls fail before normal reporting resumes.
    pub fn fail_polls(self, n: usize) -> Self {
        self.failing_polls.store(n, Ordering::SeqCst);
        self
    }

    pub fn set_status(&self, message_id: &str, status: MessageStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(message_id.to_string(), status);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn poll_count(&self, message_id: &str) -> usize {
        self.polls.lock().unwrap().get(message_id).copied().unwrap_or(0)
    }

    pub fn total_polls(&self) -> usize {
        self.polls.lock().unwrap().values().sum()
    }
}

impl Default for MockInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl InboxClient for MockInbox {
    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<SendReceipt>> {
        Box::pin(async move {
            if let Some(err) = &self.send_error {
                return Err(WeftError::Inbox(err.clone()));
            }
            self.sent.lock().unwrap().push(message);
            let message_id = self
                .assign_ids
                .then(|| format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
            Ok(SendReceipt { message_id })
        })
    }

    fn status(&self, message_id: &str) -> BoxFuture<'_, Result<MessageStatus>> {
        let message_id = message_id.to_string();
        Box::pin(async move {
            let count = {
                let mut polls = self.polls.lock().unwrap();
                let count = polls.entry(message_id.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let failing = self
                .failing_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(WeftError::Inbox("inbox temporarily unavailable".into()));
            }

            if let Some(status) = self.statuses.lock().unwrap().get(&message_id) {
                return Ok(status.clone());
            }
            match &self.reply_after {
                Some((after, status)) if count >= *after => Ok(status.clone()),
                _ => Ok(pending_status()),
            }
        })
    }
}
