use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;

use crate::permissions::PermissionRequest;

pub const DEFAULT_THINKING_LABEL: &str = "Thinking";

/// One entry of the user-facing conversation view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryRecord {
    User {
        text: String,
    },
    Assistant {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        content: String,
        is_error: bool,
    },
    Error {
        message: String,
    },
}

/// Receives every change the engine makes to [`ConversationState`].
///
/// Callbacks run after the engine has released its locks, in the order the
/// changes were made, so an observer may call back into the engine.
pub trait EngineObserver: Send + Sync {
    fn history_appended(&self, _record: &HistoryRecord) {}

    fn thinking_changed(&self, _thinking: Option<&str>) {}

    fn permission_changed(&self, _request: Option<&PermissionRequest>) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

#[derive(Debug)]
enum Notification {
    History(HistoryRecord),
    Thinking(Option<String>),
    Permission(Option<PermissionRequest>),
}

#[derive(Debug, Default)]
struct Outbox {
    pending: VecDeque<Notification>,
    delivering: bool,
}

/// Collects notifications raised while engine locks are held and hands them
/// to the observer from [`NotificationQueue::deliver`].
///
/// Only one caller delivers at a time. A caller that finds delivery already
/// running (another thread, or an observer re-entering the engine) leaves its
/// notifications to that delivery loop.
pub(crate) struct NotificationQueue {
    observer: Arc<dyn EngineObserver>,
    outbox: Mutex<Outbox>,
}

impl NotificationQueue {
    pub(crate) fn new(observer: Arc<dyn EngineObserver>) -> Self {
        Self {
            observer,
            outbox: Mutex::new(Outbox::default()),
        }
    }

    pub(crate) fn deliver(&self) {
        {
            let mut outbox = self.lock();
            if outbox.delivering || outbox.pending.is_empty() {
                return;
            }
            outbox.delivering = true;
        }
        loop {
            let next = {
                let mut outbox = self.lock();
                let next = outbox.pending.pop_front();
                if next.is_none() {
                    outbox.delivering = false;
                }
                next
            };
            match next {
                Some(Notification::History(record)) => self.observer.history_appended(&record),
                Some(Notification::Thinking(thinking)) => {
                    self.observer.thinking_changed(thinking.as_deref());
                }
                Some(Notification::Permission(request)) => {
                    self.observer.permission_changed(request.as_ref());
                }
                None => return,
            }
        }
    }

    fn push(&self, notification: Notification) {
        self.lock().pending.push_back(notification);
    }

    fn lock(&self) -> MutexGuard<'_, Outbox> {
        match self.outbox.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl EngineObserver for NotificationQueue {
    fn history_appended(&self, record: &HistoryRecord) {
        self.push(Notification::History(record.clone()));
    }

    fn thinking_changed(&self, thinking: Option<&str>) {
        self.push(Notification::Thinking(thinking.map(str::to_owned)));
    }

    fn permission_changed(&self, request: Option<&PermissionRequest>) {
        self.push(Notification::Permission(request.cloned()));
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub history: Vec<HistoryRecord>,
    /// `None` when idle, otherwise the label to show.
    pub thinking: Option<String>,
    pub pending_permission: Option<PermissionRequest>,
    last_thinking_label: Option<String>,
}

impl ConversationState {
    pub fn append(&mut self, record: HistoryRecord, observer: &dyn EngineObserver) {
        observer.history_appended(&record);
        self.history.push(record);
    }

    /// Marks the engine busy, reusing the last label when there is one.
    pub fn start_thinking(&mut self, observer: &dyn EngineObserver) {
        let label = self
            .last_thinking_label
            .clone()
            .unwrap_or_else(|| DEFAULT_THINKING_LABEL.to_owned());
        self.set_thinking(Some(label), observer);
    }

    pub fn set_thinking_label(&mut self, label: impl Into<String>, observer: &dyn EngineObserver) {
        let label = label.into();
        self.last_thinking_label = Some(label.clone());
        self.set_thinking(Some(label), observer);
    }

    pub fn stop_thinking(&mut self, observer: &dyn EngineObserver) {
        self.set_thinking(None, observer);
    }

    pub fn set_pending_permission(
        &mut self,
        request: Option<PermissionRequest>,
        observer: &dyn EngineObserver,
    ) {
        observer.permission_changed(request.as_ref());
        self.pending_permission = request;
    }

    fn set_thinking(&mut self, thinking: Option<String>, observer: &dyn EngineObserver) {
        if self.thinking == thinking {
            return;
        }
        observer.thinking_changed(thinking.as_deref());
        self.thinking = thinking;
    }
}
